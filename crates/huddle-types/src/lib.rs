pub mod api;
pub mod conversation;
pub mod error;
pub mod events;
pub mod models;
pub mod moderation;

use std::time::Duration;

pub use conversation::ConversationKey;

/// Ordering id assigned by the message router. Unique across the store and
/// strictly increasing within a conversation.
pub type MessageId = i64;

/// Longest accepted message body, in characters.
pub const MAX_BODY_CHARS: usize = 4000;

/// Longest attachment reference accepted as message metadata.
pub const MAX_ATTACHMENT_LEN: usize = 512;

/// How long a typing indicator lives without a refresh, on both ends.
pub const TYPING_TTL: Duration = Duration::from_secs(3);
