//! Async driver: owns the gateway socket, reconnects with backoff, fills
//! gaps over REST and replays queued sends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_types::events::{GatewayCommand, GatewayEvent};
use huddle_types::{ConversationKey, MessageId};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::rest::RestClient;
use crate::state::{ClientState, ClientUpdate};
use crate::view::ConversationView;

enum SessionEnd {
    Dropped,
    Shutdown,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    rest: RestClient,
    state: Mutex<ClientState>,
    /// Present while a socket is up. Lock after `state` when both are needed.
    outgoing: Mutex<Option<mpsc::UnboundedSender<GatewayCommand>>>,
    updates: broadcast::Sender<ClientUpdate>,
    shutdown: watch::Sender<bool>,
}

impl Client {
    pub fn new(config: ClientConfig, owner: Uuid) -> Self {
        let (updates, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                rest: RestClient::new(&config),
                state: Mutex::new(ClientState::new(owner, &config)),
                outgoing: Mutex::new(None),
                updates,
                shutdown,
                config,
            }),
        }
    }

    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    pub fn updates(&self) -> broadcast::Receiver<ClientUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Read a view under the state lock.
    pub async fn with_view<R>(&self, conversation: ConversationKey, f: impl FnOnce(&ConversationView) -> R) -> Option<R> {
        let state = self.inner.state.lock().await;
        state.view(conversation).map(f)
    }

    /// Read the whole client state under its lock.
    pub async fn with_state<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        let state = self.inner.state.lock().await;
        f(&state)
    }

    /// Keep a gateway session up until `shutdown` is called.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = Backoff::from_config(&self.inner.config);
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let updates = self.inner.state.lock().await.transport_connecting();
            self.publish(updates);

            match self.run_session(&mut shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => {
                    self.transport_dropped().await;
                    return Ok(());
                }
                Ok(SessionEnd::Dropped) => info!("gateway connection closed"),
                Err(e) => warn!("gateway session failed: {}", e),
            }
            self.transport_dropped().await;

            let delay = backoff.next_delay();
            info!("reconnecting in {:?} (attempt {})", delay, backoff.attempt());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>, backoff: &mut Backoff) -> Result<SessionEnd> {
        let (socket, _) = tokio_tungstenite::connect_async(self.inner.config.gateway_url()).await?;
        backoff.reset();
        info!("connected to gateway");

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<GatewayCommand>();

        {
            let mut state = self.inner.state.lock().await;
            let updates = state.transport_connected();
            if let Some(subscribe) = state.resubscribe() {
                let _ = tx.send(subscribe);
            }
            *self.inner.outgoing.lock().await = Some(tx.clone());
            drop(state);
            self.publish(updates);
        }

        // Backfill runs beside the reader so pushes keep draining meanwhile
        let resync = tokio::spawn({
            let client = self.clone();
            async move { client.resync().await }
        });

        let mut prune = tokio::time::interval(self.prune_every());

        let end = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break Ok(SessionEnd::Shutdown);
                }

                Some(command) = rx.recv() => {
                    let text = match serde_json::to_string(&command) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode command: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        break Err(ClientError::from(e));
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(event) => self.handle_event(event).await,
                        Err(e) => warn!("unparseable gateway event: {}", e),
                    },
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                            break Err(ClientError::from(e));
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break Ok(SessionEnd::Dropped),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ClientError::from(e)),
                },

                _ = prune.tick() => {
                    let updates = self.inner.state.lock().await.prune_typing(Instant::now());
                    self.publish(updates);
                }
            }
        };

        resync.abort();
        end
    }

    fn prune_every(&self) -> Duration {
        (self.inner.config.typing_ttl / 3).max(Duration::from_millis(100))
    }

    async fn transport_dropped(&self) {
        *self.inner.outgoing.lock().await = None;
        let updates = self.inner.state.lock().await.transport_dropped();
        self.publish(updates);
    }

    /// After a (re)connect: close every open view's gap, then replay queued
    /// sends in their original order.
    async fn resync(&self) {
        let open = self.inner.state.lock().await.open_conversations();
        for conversation in open {
            if let Err(e) = self.fill(conversation).await {
                warn!("backfill for {} failed: {}", conversation, e);
            }
        }
        self.flush_outbox().await;
    }

    /// Fetch history until the view is Live. A page that breaks the
    /// timeline's invariants resets the view and the fetch starts over once.
    async fn fill(&self, conversation: ConversationKey) -> Result<()> {
        let mut rebuilt = false;
        loop {
            let Some(query) = self.with_view(conversation, |v| v.next_query()).await else {
                return Ok(());
            };
            let page = self.inner.rest.history(conversation, query).await?;

            let mut state = self.inner.state.lock().await;
            let Some(view) = state.view_mut(conversation) else {
                return Ok(());
            };
            match view.apply_page(query, page) {
                Ok(more) => {
                    drop(state);
                    self.publish(vec![ClientUpdate::Timeline(conversation)]);
                    if !more {
                        return Ok(());
                    }
                }
                Err(e @ ClientError::CorruptState { .. }) if !rebuilt => {
                    drop(state);
                    warn!("{}", e);
                    rebuilt = true;
                    self.publish(vec![ClientUpdate::Rebuilt(conversation)]);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn flush_outbox(&self) {
        let mut state = self.inner.state.lock().await;
        let outgoing = self.inner.outgoing.lock().await;
        let Some(tx) = outgoing.as_ref() else {
            return;
        };
        for command in state.take_ready_sends() {
            if tx.send(command).is_err() {
                break;
            }
        }
        let conversations = state.open_conversations();
        drop(outgoing);
        drop(state);
        self.publish(conversations.into_iter().map(ClientUpdate::Timeline).collect());
    }

    /// Put a command on the socket. False while disconnected.
    async fn command(&self, command: GatewayCommand) -> bool {
        match self.inner.outgoing.lock().await.as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    async fn handle_event(&self, event: GatewayEvent) {
        let updates = self.inner.state.lock().await.apply(event, Instant::now());
        for update in &updates {
            if let ClientUpdate::RetryScheduled { client_id, attempt } = update {
                self.schedule_retry(*client_id, *attempt);
            }
        }
        self.publish(updates);
    }

    fn schedule_retry(&self, client_id: Uuid, attempt: u32) {
        let delay = Backoff::from_config(&self.inner.config).jittered(attempt.saturating_sub(1));
        debug!("retrying send {} in {:?}", client_id, delay);
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = client.inner.state.lock().await;
            let Some(command) = state.retry_send(client_id) else {
                return;
            };
            if let Some(tx) = client.inner.outgoing.lock().await.as_ref() {
                let _ = tx.send(command);
            }
        });
    }

    fn publish(&self, updates: Vec<ClientUpdate>) {
        for update in updates {
            // No subscribers is fine
            let _ = self.inner.updates.send(update);
        }
    }

    // -- Application-facing actions --

    /// Open a view, subscribe to it and load its latest page.
    pub async fn open(&self, conversation: ConversationKey) -> Result<()> {
        let opened = self.inner.state.lock().await.open(conversation);
        if opened {
            self.command(GatewayCommand::Subscribe {
                conversations: vec![conversation],
            })
            .await;
        }
        self.fill(conversation).await
    }

    /// Close a view. Sends already queued for it still go out.
    pub async fn close(&self, conversation: ConversationKey) {
        if self.inner.state.lock().await.close(conversation) {
            self.command(GatewayCommand::Unsubscribe {
                conversations: vec![conversation],
            })
            .await;
        }
    }

    /// Scroll back one page.
    pub async fn load_older(&self, conversation: ConversationKey) -> Result<usize> {
        let query = self
            .with_view(conversation, |v| v.older_query())
            .await
            .ok_or(ClientError::NotOpen(conversation))?;
        let Some(query) = query else {
            return Ok(0);
        };
        let page = self.inner.rest.history(conversation, query).await?;

        let mut state = self.inner.state.lock().await;
        let view = state
            .view_mut(conversation)
            .ok_or(ClientError::NotOpen(conversation))?;
        let inserted = view.apply_older(page)?;
        drop(state);
        self.publish(vec![ClientUpdate::Timeline(conversation)]);
        Ok(inserted)
    }

    /// Queue a message. It shows as pending at once and goes out as soon as
    /// a socket is available. Returns the client id that tracks it.
    pub async fn send(
        &self,
        conversation: ConversationKey,
        body: impl Into<String>,
        reply_to_id: Option<MessageId>,
        attachment: Option<String>,
    ) -> Result<Uuid> {
        let send = self
            .inner
            .state
            .lock()
            .await
            .compose(conversation, body.into(), reply_to_id, attachment, Utc::now())?;
        self.publish(vec![ClientUpdate::Timeline(conversation)]);
        self.flush_outbox().await;
        Ok(send.client_id)
    }

    pub async fn dismiss_failed(&self, conversation: ConversationKey, client_id: Uuid) -> bool {
        let dismissed = self
            .inner
            .state
            .lock()
            .await
            .dismiss_failed(conversation, client_id);
        if dismissed {
            self.publish(vec![ClientUpdate::Timeline(conversation)]);
        }
        dismissed
    }

    /// Best effort; dropped while disconnected.
    pub async fn start_typing(&self, conversation: ConversationKey) {
        self.command(GatewayCommand::TypingStart { conversation }).await;
    }

    pub async fn stop_typing(&self, conversation: ConversationKey) {
        self.command(GatewayCommand::TypingStop { conversation }).await;
    }

    /// Flip the owner's reaction. Goes over the socket when it is up and
    /// over REST otherwise; a failed REST call undoes the optimistic flip.
    pub async fn toggle_reaction(&self, conversation: ConversationKey, message_id: MessageId, emoji: &str) -> Result<()> {
        let command = self
            .inner
            .state
            .lock()
            .await
            .toggle_reaction(conversation, message_id, emoji)
            .ok_or(ClientError::NotOpen(conversation))?;
        self.publish(vec![ClientUpdate::Timeline(conversation)]);

        if self.command(command).await {
            return Ok(());
        }

        let result = self.inner.rest.toggle_reaction(message_id, emoji).await;
        let mut state = self.inner.state.lock().await;
        let owner = state.owner();
        if let Some(view) = state.view_mut(conversation) {
            match &result {
                Ok(reaction) => {
                    view.timeline_mut()
                        .apply_reaction(message_id, owner, emoji, reaction.added);
                }
                Err(_) => view.timeline_mut().revert_reaction(message_id, emoji),
            }
        }
        drop(state);
        self.publish(vec![ClientUpdate::Timeline(conversation)]);
        result.map(|_| ())
    }

    /// Advance the owner's read cursor, over the socket or the REST
    /// fallback.
    pub async fn mark_read(&self, conversation: ConversationKey, up_to: MessageId) -> Result<()> {
        let command = self.inner.state.lock().await.mark_read(conversation, up_to);
        let Some(command) = command else {
            return Ok(());
        };
        self.publish(vec![ClientUpdate::Timeline(conversation)]);

        if self.command(command).await {
            return Ok(());
        }
        self.inner.rest.mark_read(conversation, up_to).await?;
        Ok(())
    }

    /// Load a channel's members to seed presence and mute state.
    pub async fn refresh_members(&self, channel_id: Uuid) -> Result<()> {
        let members = self.inner.rest.channel_members(channel_id).await?;
        let updates = self.inner.state.lock().await.seed_members(&members);
        self.publish(updates);
        Ok(())
    }
}
