use thiserror::Error;

use darkchat_types::models::ConnectionId;

/// Anything that stops a handler before it can reply with data.
/// `Display` is what a caller sees when detail is not redacted.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No player session for connection {0}")]
    UnknownSession(ConnectionId),

    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("{0}")]
    Store(#[from] anyhow::Error),
}
