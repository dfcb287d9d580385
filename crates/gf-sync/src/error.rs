//! Error types for gf-sync

use thiserror::Error;

/// Result type alias using gf-sync Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during sync and summary operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the backend client layer
    #[error(transparent)]
    Client(#[from] gf_client::Error),

    /// The operation needs an authenticated session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The summary stream reported an error
    #[error("Summary failed: {0}")]
    Summary(String),

    /// A generic sync error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if this error means the session is no longer usable
    pub fn is_session_error(&self) -> bool {
        match self {
            Error::NotAuthenticated => true,
            Error::Client(e) => e.is_unauthorized(),
            _ => false,
        }
    }

    /// Check if retrying on the next poll is likely to succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Client(e) => e.is_transient(),
            _ => false,
        }
    }
}
