use helmsman_protocol::ToolDescriptor;

/// Small catalog used across tests: search, summarize, and a pdf reader.
pub fn sample_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new("web_search")
            .with_description("search the web for pages")
            .with_tags(["search", "web"])
            .with_cost(3.0)
            .with_tokens(400),
        ToolDescriptor::new("summarize")
            .with_description("summarize text into a short answer")
            .with_tags(["text"])
            .with_cost(4.0)
            .with_tokens(800),
        ToolDescriptor::new("read_pdf")
            .with_description("extract text from pdf documents")
            .with_tags(["pdf", "documents"])
            .with_cost(5.0)
            .with_tokens(1200),
    ]
}
