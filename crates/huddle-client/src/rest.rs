//! REST backfill calls: history pages, contacts, members, and fallbacks for
//! sends, read cursors and reactions when the socket is down.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_types::api::{
    ChannelMember, Contact, MarkReadRequest, ReactionState, SendMessageRequest, ToggleReactionRequest,
    UnreadResponse,
};
use huddle_types::error::SendRejection;
use huddle_types::models::{Message, ReadCursor};
use huddle_types::{ConversationKey, MessageId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// One page request. `after` wins over `before` on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryQuery {
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<MessageId>,
}

impl HistoryQuery {
    pub fn latest(limit: u32) -> Self {
        Self {
            limit,
            before: None,
            after: None,
        }
    }

    pub fn after(limit: u32, id: MessageId) -> Self {
        Self {
            limit,
            before: None,
            after: Some(id),
        }
    }

    pub fn before(limit: u32, id: MessageId) -> Self {
        Self {
            limit,
            before: Some(id),
            after: None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    rejection: Option<SendRejection>,
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.server_url.clone(),
            token: config.token.clone(),
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn history(&self, conversation: ConversationKey, query: HistoryQuery) -> Result<Vec<Message>> {
        let url = self.url(&format!("/conversations/{}/messages", conversation));
        let resp = self.authed(self.http.get(url).query(&query)).send().await?;
        decode(resp).await
    }

    pub async fn send_message(&self, conversation: ConversationKey, req: &SendMessageRequest) -> Result<Message> {
        let url = self.url(&format!("/conversations/{}/messages", conversation));
        let resp = self.authed(self.http.post(url).json(req)).send().await?;
        decode(resp).await
    }

    pub async fn mark_read(&self, conversation: ConversationKey, up_to_message_id: MessageId) -> Result<ReadCursor> {
        let url = self.url(&format!("/conversations/{}/read", conversation));
        let body = MarkReadRequest { up_to_message_id };
        let resp = self.authed(self.http.patch(url).json(&body)).send().await?;
        decode(resp).await
    }

    pub async fn unread(&self, conversation: ConversationKey) -> Result<UnreadResponse> {
        let url = self.url(&format!("/conversations/{}/unread", conversation));
        let resp = self.authed(self.http.get(url)).send().await?;
        decode(resp).await
    }

    pub async fn toggle_reaction(&self, message_id: MessageId, emoji: &str) -> Result<ReactionState> {
        let url = self.url(&format!("/messages/{}/reactions", message_id));
        let body = ToggleReactionRequest {
            emoji: emoji.to_string(),
        };
        let resp = self.authed(self.http.post(url).json(&body)).send().await?;
        decode(resp).await
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        let resp = self.authed(self.http.get(self.url("/contacts"))).send().await?;
        decode(resp).await
    }

    pub async fn channel_members(&self, channel_id: Uuid) -> Result<Vec<ChannelMember>> {
        let url = self.url(&format!("/channels/{}/members", channel_id));
        let resp = self.authed(self.http.get(url)).send().await?;
        decode(resp).await
    }
}

/// Decode a success body, or turn the error body into a typed error.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            rejection: Some(rejection),
            ..
        }) => Err(ClientError::Rejected(rejection)),
        Ok(ErrorBody { error, .. }) => Err(ClientError::Status {
            status: status.as_u16(),
            message: error,
        }),
        Err(_) => Err(ClientError::Status {
            status: status.as_u16(),
            message: text,
        }),
    }
}
