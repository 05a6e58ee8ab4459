use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MAX_ATTACHMENT_LEN, MAX_BODY_CHARS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationKeyError {
    #[error("a direct conversation needs two distinct participants")]
    SelfConversation,
    #[error("malformed conversation key: {0}")]
    Malformed(String),
}

/// Policy rejection of a send. Surfaced synchronously to the sender and not
/// worth retrying until the underlying condition changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendRejection {
    #[error("sender is not a member of this conversation")]
    NotAMember,
    #[error("sender is muted")]
    Muted {
        reason: Option<String>,
        muted_until: Option<DateTime<Utc>>,
    },
    #[error("message body is empty")]
    EmptyBody,
    #[error("message body exceeds {max} characters")]
    BodyTooLong { max: usize },
    #[error("attachment reference is too long")]
    AttachmentTooLong,
    #[error("reply target {reply_to_id} is not in this conversation")]
    UnknownReplyTarget { reply_to_id: i64 },
}

/// Payload checks that need no store access.
pub fn validate_payload(body: &str, attachment: Option<&str>) -> Result<(), SendRejection> {
    if let Some(attachment) = attachment {
        if attachment.len() > MAX_ATTACHMENT_LEN || attachment.trim().is_empty() {
            return Err(SendRejection::AttachmentTooLong);
        }
    }
    if body.trim().is_empty() && attachment.is_none() {
        return Err(SendRejection::EmptyBody);
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(SendRejection::BodyTooLong { max: MAX_BODY_CHARS });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_oversized_bodies_rejected() {
        assert_eq!(validate_payload("   ", None), Err(SendRejection::EmptyBody));
        assert!(validate_payload("", Some("evidence/1234.png")).is_ok());
        let long = "x".repeat(MAX_BODY_CHARS + 1);
        assert_eq!(
            validate_payload(&long, None),
            Err(SendRejection::BodyTooLong { max: MAX_BODY_CHARS })
        );
        assert!(validate_payload(&"é".repeat(MAX_BODY_CHARS), None).is_ok());
        assert_eq!(
            validate_payload("see attached", Some(&"a".repeat(MAX_ATTACHMENT_LEN + 1))),
            Err(SendRejection::AttachmentTooLong)
        );
    }
}
