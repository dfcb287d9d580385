//! gf-sync: Conversation sync engine and streaming summary parser
//!
//! This crate keeps a local message list and user set eventually consistent
//! with the chat backend through interval polling, and turns a streamed
//! model response into live "reasoning" and "output" text buffers.

pub mod accumulator;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod events;
mod handle;
pub mod store;
pub mod summarizer;

pub use accumulator::{Phase, StreamAccumulator, clean_control_markers};
pub use cursor::{FetchMode, SyncCursor};
pub use engine::{PollOutcome, PollingTasks, SyncConfig, SyncEngine};
pub use error::{Error, Result};
pub use events::SyncEvent;
pub use store::{ChatStore, SessionStatus};
pub use summarizer::{
    SummaryOutcome, SummaryState, Summarizer, describe_summary_error, summary_lines,
};
