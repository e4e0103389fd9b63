//! Test helpers shared across Helmsman crates.

pub mod events;
pub mod sleeper;
pub mod tools;
pub mod worker;

pub use events::RecordingEventSink;
pub use sleeper::RecordingSleeper;
pub use tools::sample_tools;
pub use worker::ScriptedWorker;
