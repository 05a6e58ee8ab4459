//! Client side of the messaging core.
//!
//! Merges gateway pushes, REST history pages and local optimistic edits into
//! one ordered, de-duplicated timeline per conversation, and keeps sends
//! alive across dropped connections.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod moderation;
pub mod outbox;
pub mod presence;
pub mod rest;
pub mod state;
pub mod timeline;
pub mod typing;
pub mod view;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use state::{ClientState, ClientUpdate, ConnectionState};
pub use view::{ConversationView, ViewState};
