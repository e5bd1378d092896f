use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{Dispatcher, Target};
use crate::registry::Registry;
use crate::typing::TypingTracker;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, then the
/// event-relay loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    typing: TypingTracker,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    let registry = dispatcher.registry().clone();
    let (session_id, mut session_rx) = registry.register(user_id).await;
    info!("{} connected to gateway as session {}", user_id, session_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        session_id,
        user_id,
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        registry.unregister(session_id).await;
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward this session's delivery queue -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = session_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
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
    let dispatcher_recv = dispatcher.clone();
    let registry_recv = registry.clone();
    let typing_recv = typing.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher_recv,
                            &registry_recv,
                            &db,
                            &typing_recv,
                            session_id,
                            user_id,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
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

    registry.unregister(session_id).await;
    info!("{} session {} disconnected from gateway", user_id, session_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    registry: &Registry,
    db: &Database,
    typing: &TypingTracker,
    session_id: Uuid,
    user_id: Uuid,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Join { conversation_id } => {
            // Membership is checked here; the conversation's events only
            // flow to sessions that joined it.
            let allowed = match db.get_conversation(&conversation_id) {
                Ok(Some(conv)) if !conv.removed => {
                    db.is_member(&conversation_id, &user_id).unwrap_or(false)
                }
                Ok(_) => false,
                Err(e) => {
                    warn!("Membership lookup failed for {}: {}", conversation_id, e);
                    false
                }
            };
            if allowed {
                registry.join(session_id, conversation_id).await;
                info!("{} joined {} on session {}", user_id, conversation_id, session_id);
            } else {
                warn!(
                    "{} denied join to {} on session {}",
                    user_id, conversation_id, session_id
                );
            }
        }

        GatewayCommand::Leave { conversation_id } => {
            registry.leave(session_id, conversation_id).await;
        }

        GatewayCommand::StartTyping { conversation_id } => {
            if !registry.is_joined(session_id, conversation_id).await {
                return;
            }
            typing.start(conversation_id, user_id, Instant::now());
            dispatcher
                .publish(
                    GatewayEvent::TypingStarted {
                        conversation_id,
                        user_id,
                    },
                    Target::Conversation(conversation_id),
                )
                .await;
        }

        GatewayCommand::StopTyping { conversation_id } => {
            if typing.stop(conversation_id, user_id) {
                dispatcher
                    .publish(
                        GatewayEvent::TypingStopped {
                            conversation_id,
                            user_id,
                        },
                        Target::Conversation(conversation_id),
                    )
                    .await;
            }
        }
    }
}
