//! Error types for Icytrope
//!
//! Centralized error handling using thiserror. Every variant is fatal to the
//! session that raised it.

use std::io;

use thiserror::Error;

/// Boxed error returned by track-change callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the ICY stream processor
#[derive(Error, Debug)]
pub enum IcyError {
    #[error("{}", friendly_connection_error(.0))]
    Connection(#[from] io::Error),

    #[error("Missing header: {0}")]
    MissingHeader(String),

    #[error("Duplicate header: {0}")]
    DuplicateHeader(String),

    #[error("Invalid value for header {name}: {value:?}")]
    InvalidHeader { name: String, value: String },

    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("Stream title not found in metadata: {0:?}")]
    MetadataParse(String),

    #[error("Incomplete metadata frame: need {needed} bytes, have {available}")]
    IncompleteFrame { needed: usize, available: usize },

    #[error("Title too long for a metadata frame: {0} bytes")]
    TitleTooLong(usize),

    #[error("Track change callback failed: {0}")]
    Callback(#[source] BoxError),

    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to spawn session thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Session closed")]
    Closed,
}

/// Result type alias for Icytrope
pub type Result<T> = std::result::Result<T, IcyError>;

impl IcyError {
    /// True when the transport gave up waiting for data
    pub fn is_timeout(&self) -> bool {
        match self {
            IcyError::Connection(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// True when the server's header block violated protocol expectations
    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            IcyError::MissingHeader(_)
                | IcyError::DuplicateHeader(_)
                | IcyError::InvalidHeader { .. }
                | IcyError::MalformedHeader(_)
        )
    }
}

fn friendly_connection_error(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => "Connection closed by server".to_string(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => "Connection timed out".to_string(),
        io::ErrorKind::ConnectionRefused => "Connection refused".to_string(),
        io::ErrorKind::ConnectionReset => "Connection reset by server".to_string(),
        _ => format!("Connection error: {e}"),
    }
}
