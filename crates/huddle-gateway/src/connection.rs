use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use huddle_types::ConversationKey;
use huddle_types::api::Claims;
use huddle_types::error::SendRejection;
use huddle_types::events::{GatewayCommand, GatewayEvent, PresenceScope};

use crate::Gateway;
use crate::error::GatewayError;
use crate::router::SendRequest;
use crate::session::ConnectionId;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a WebSocket whose bearer token was already validated at the HTTP
/// upgrade layer.
pub async fn handle_connection_authenticated(socket: WebSocket, gateway: Gateway, claims: Claims) {
    let (mut sender, receiver) = socket.split();
    let user_id = claims.sub;

    info!("{} ({}) connected to gateway", claims.display_name, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        display_name: claims.display_name.clone(),
        role: claims.role,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, gateway, user_id, claims.display_name).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| error!("failed to encode event: {}", e))?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    gateway: Gateway,
    user_id: Uuid,
    display_name: String,
) {
    // Subscribe to deltas before taking the snapshot so nothing falls between
    let mut presence_rx = gateway.dispatcher.presence().on_delta();
    let (conn_id, mut user_rx) = gateway.dispatcher.register_connection(user_id).await;

    let online = gateway
        .presence_snapshot(user_id, &PresenceScope::Contacts)
        .await
        .unwrap_or_else(|e| {
            warn!("presence snapshot for {} failed: {}", user_id, e);
            Vec::new()
        });
    if send_event(&mut sender, &GatewayEvent::PresenceSnapshot { online }).await.is_err() {
        gateway.disconnect(conn_id).await;
        return;
    }

    // Set by the reader on every Pong
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events + presence deltas -> client, with heartbeat
    let send_gateway = gateway.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = presence_rx.recv() => {
                    let event = match result {
                        Ok(change) if change.user_id == user_id => continue,
                        Ok(change) => GatewayEvent::PresenceDelta {
                            user_id: change.user_id,
                            online: change.online,
                        },
                        Err(RecvError::Lagged(n)) => {
                            // Missed deltas: replace them with a full snapshot
                            warn!("Presence receiver lagged by {} deltas, resending snapshot", n);
                            match send_gateway.presence_snapshot(user_id, &PresenceScope::Contacts).await {
                                Ok(online) => GatewayEvent::PresenceSnapshot { online },
                                Err(_) => continue,
                            }
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_gateway = gateway.clone();
    let name_recv = display_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_gateway, conn_id, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Binary(_) => {
                    warn!("{} ({}) sent a binary frame, ignoring", name_recv, user_id);
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", display_name, user_id);
}

async fn handle_command(gateway: &Gateway, conn_id: ConnectionId, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::SendDirectMessage {
            recipient_id,
            body,
            reply_to_id,
            attachment,
            client_id,
        } => {
            let Ok(conversation) = ConversationKey::direct(user_id, recipient_id) else {
                reject(gateway, conn_id, client_id, SendRejection::NotAMember).await;
                return;
            };
            let req = SendRequest {
                conversation,
                sender_id: user_id,
                body,
                reply_to_id,
                attachment,
                client_id: Some(client_id),
            };
            route_send(gateway, conn_id, client_id, req).await;
        }

        GatewayCommand::SendChannelMessage {
            channel_id,
            body,
            reply_to_id,
            attachment,
            client_id,
        } => {
            let req = SendRequest {
                conversation: ConversationKey::channel(channel_id),
                sender_id: user_id,
                body,
                reply_to_id,
                attachment,
                client_id: Some(client_id),
            };
            route_send(gateway, conn_id, client_id, req).await;
        }

        GatewayCommand::TypingStart { conversation } => {
            trace!("{} typing in {}", user_id, conversation);
            if let Err(e) = gateway.start_typing(conversation, user_id).await {
                warn!("typing_start from {} in {} failed: {}", user_id, conversation, e);
            }
        }

        GatewayCommand::TypingStop { conversation } => {
            gateway.stop_typing(conversation, user_id).await;
        }

        GatewayCommand::ToggleReaction { message_id, emoji } => {
            if let Err(e) = gateway.reactions.toggle(message_id, user_id, &emoji).await {
                warn!("toggle_reaction by {} on {} failed: {}", user_id, message_id, e);
            }
        }

        GatewayCommand::MarkRead {
            conversation,
            up_to_message_id,
        } => {
            if let Err(e) = gateway
                .receipts
                .mark_read(user_id, conversation, up_to_message_id)
                .await
            {
                warn!("mark_read by {} in {} failed: {}", user_id, conversation, e);
            }
        }

        GatewayCommand::Subscribe { conversations } => {
            let requested = conversations.len();
            match gateway.authorized_conversations(user_id, conversations).await {
                Ok(allowed) => {
                    info!(
                        "{} subscribing to {} conversations ({} refused)",
                        user_id,
                        allowed.len(),
                        requested - allowed.len()
                    );
                    gateway.dispatcher.subscribe(conn_id, &allowed).await;
                }
                Err(e) => warn!("subscribe by {} failed: {}", user_id, e),
            }
        }

        GatewayCommand::Unsubscribe { conversations } => {
            gateway.dispatcher.unsubscribe(conn_id, &conversations).await;
        }

        GatewayCommand::PresenceSnapshot { scope } => match gateway.presence_snapshot(user_id, &scope).await {
            Ok(online) => {
                gateway
                    .dispatcher
                    .send_to_connection(conn_id, GatewayEvent::PresenceSnapshot { online })
                    .await;
            }
            Err(e) => warn!("presence snapshot for {} failed: {}", user_id, e),
        },
    }
}

async fn route_send(gateway: &Gateway, conn_id: ConnectionId, client_id: Uuid, req: SendRequest) {
    let conversation = req.conversation;
    let event = match gateway.router.send(req).await {
        Ok(message) => GatewayEvent::SendAck {
            client_id,
            message_id: message.id,
        },
        Err(GatewayError::Rejected(reason)) => {
            info!("send by {} in {} rejected: {}", conn_id, conversation, reason);
            GatewayEvent::SendRejected { client_id, reason }
        }
        Err(e) => {
            error!("send in {} failed: {}", conversation, e);
            GatewayEvent::SendFailed { client_id }
        }
    };
    gateway.dispatcher.send_to_connection(conn_id, event).await;
}

async fn reject(gateway: &Gateway, conn_id: ConnectionId, client_id: Uuid, reason: SendRejection) {
    gateway
        .dispatcher
        .send_to_connection(conn_id, GatewayEvent::SendRejected { client_id, reason })
        .await;
}
