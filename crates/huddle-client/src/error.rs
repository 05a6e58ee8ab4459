use thiserror::Error;

use huddle_types::ConversationKey;
use huddle_types::error::SendRejection;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rejected: {0}")]
    Rejected(#[from] SendRejection),

    #[error("websocket: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("conversation {0} is not open")]
    NotOpen(ConversationKey),

    /// Local state for a conversation broke an invariant and was thrown
    /// away.
    #[error("corrupt local state for {conversation}: {detail}")]
    CorruptState {
        conversation: ConversationKey,
        detail: String,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
