//! gf-client: Wire types and transport for the gradientflow chat backend
//!
//! This crate defines the message/user data model, the collaborator traits the
//! sync engine and summary parser consume, and a reqwest-based implementation
//! of both (plain JSON polling endpoints plus the SSE summary stream).

pub mod backend;
pub mod error;
pub mod http;
pub mod summary;
pub mod types;

pub use backend::{ChatBackend, SummaryBackend};
pub use error::{Error, Result};
pub use http::HttpBackend;
pub use summary::{SummaryEventStream, SummaryStreamEvent};
pub use types::*;
