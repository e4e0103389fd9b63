//! Deterministic keyword ranking of candidate tools against a goal.

use helmsman_protocol::ToolDescriptor;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static NON_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[\W_]+").ok());

/// Lowercased word terms of `text`.
pub(crate) fn terms(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    match NON_WORD.as_ref() {
        Some(splitter) => splitter
            .split(&lowered)
            .filter(|term| !term.is_empty())
            .map(str::to_string)
            .collect(),
        None => lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|term| !term.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// A tool scored against a goal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RankedTool {
    pub tool: ToolDescriptor,
    /// Goal terms found in the tool's id, description, or tags.
    pub matched: BTreeSet<String>,
}

impl RankedTool {
    pub fn score(&self) -> usize {
        self.matched.len()
    }
}

/// Score every tool, drop non-matching ones, and order by score then id.
pub(crate) fn rank_tools(goal_terms: &BTreeSet<String>, tools: Vec<ToolDescriptor>) -> Vec<RankedTool> {
    let mut ranked: Vec<RankedTool> = tools
        .into_iter()
        .filter_map(|tool| {
            let mut corpus = terms(&tool.id);
            corpus.extend(terms(&tool.description));
            for tag in &tool.tags {
                corpus.extend(terms(tag));
            }
            let matched: BTreeSet<String> = goal_terms.intersection(&corpus).cloned().collect();
            (!matched.is_empty()).then_some(RankedTool { tool, matched })
        })
        .collect();
    ranked.sort_by(|a, b| match b.score().cmp(&a.score()) {
        Ordering::Equal => a.tool.id.cmp(&b.tool.id),
        other => other,
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_punctuation_and_underscores() {
        let split: Vec<_> = terms("Read_File, then SEARCH-web!").into_iter().collect();
        assert_eq!(split, vec!["file", "read", "search", "then", "web"]);
    }

    #[test]
    fn orders_by_score_then_id() {
        let goal = terms("search the web and summarize results");
        let tools = vec![
            ToolDescriptor::new("zeta_search").with_description("search engine"),
            ToolDescriptor::new("alpha_search").with_description("search engine"),
            ToolDescriptor::new("web_search").with_description("search the web"),
            ToolDescriptor::new("calculator").with_description("arithmetic"),
        ];
        let ids: Vec<_> = rank_tools(&goal, tools)
            .into_iter()
            .map(|ranked| ranked.tool.id)
            .collect();
        assert_eq!(ids, vec!["web_search", "alpha_search", "zeta_search"]);
    }

    #[test]
    fn tags_contribute_to_matches() {
        let goal = terms("summarize this pdf");
        let tools = vec![ToolDescriptor::new("reader").with_tags(["pdf", "documents"])];
        let ranked = rank_tools(&goal, tools);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score(), 1);
    }
}
