use thiserror::Error;

use huddle_types::error::SendRejection;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Policy refused the send; not retryable until the condition changes.
    #[error(transparent)]
    Rejected(#[from] SendRejection),

    #[error("not a participant of {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("storage failure: {0}")]
    Store(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
