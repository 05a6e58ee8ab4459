use std::time::Duration;

use huddle_types::TYPING_TTL;

/// Client tuning. `Default` matches what the server assumes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP(S) url of the server, without a trailing slash.
    pub server_url: String,
    /// Bearer token issued by the account service.
    pub token: String,
    /// Messages fetched when a conversation view opens.
    pub history_page: u32,
    /// Local expiry for typing indicators with no refresh.
    pub typing_ttl: Duration,
    /// Attempts for a queued send before it is surfaced as failed.
    pub max_send_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of each delay added or removed at random.
    pub jitter: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            token: String::new(),
            history_page: 50,
            typing_ttl: TYPING_TTL,
            max_send_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Gateway url. The token rides in the query since browsers and some
    /// proxies drop handshake headers.
    pub fn gateway_url(&self) -> String {
        format!(
            "{}/gateway?token={}",
            self.server_url
                .replacen("http://", "ws://", 1)
                .replacen("https://", "wss://", 1),
            self.token
        )
    }
}
