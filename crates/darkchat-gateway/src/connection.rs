use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use darkchat_db::Database;
use darkchat_service::ChannelService;
use darkchat_types::api::Claims;
use darkchat_types::events::{GatewayCommand, GatewayEvent};
use darkchat_types::models::{ConnectionId, PlayerSession};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may stay silent before sending Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection needs from the server.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub service: Arc<ChannelService>,
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

/// Handle a single WebSocket connection: Identify handshake, then the
/// request/broadcast loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();

    let player = match wait_for_identify(&mut receiver, &state.jwt_secret).await {
        Some(player) => player,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    // Keep the phone number on record so it resolves while the player is offline
    let db = state.db.clone();
    let (identifier, phone_number) = (player.identifier.clone(), player.phone_number.clone());
    match tokio::task::spawn_blocking(move || db.upsert_player(&identifier, &phone_number)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Failed to record player {}: {}", player.identifier, e);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    }

    // Reachable for broadcasts before the client hears Ready
    let identifier = player.identifier.clone();
    let ready = GatewayEvent::Ready {
        identifier: player.identifier.clone(),
        phone_number: player.phone_number.clone(),
    };
    let phone_number = player.phone_number.clone();
    let (conn_id, events_rx) = state.dispatcher.register(player).await;
    info!(
        "{} ({}) connected to gateway, {} online",
        identifier,
        phone_number,
        state.dispatcher.online_count().await
    );

    if send_event(&mut sender, &ready).await.is_err() {
        state.dispatcher.unregister(conn_id).await;
        return;
    }

    run_connection_loop(sender, receiver, state, identifier, conn_id, events_rx).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: GatewayState,
    identifier: String,
    conn_id: ConnectionId,
    mut events_rx: mpsc::UnboundedReceiver<GatewayEvent>,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events (responses and broadcasts) -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
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
    let recv_state = state.clone();
    let identifier_recv = identifier.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Request {
                        request_id,
                        request,
                    }) => {
                        // Requests run concurrently; each replies on its own
                        let service = recv_state.service.clone();
                        tokio::spawn(async move {
                            service.handle(conn_id, request_id, request).await;
                        });
                    }
                    Ok(GatewayCommand::Identify { .. }) => {
                        warn!("{} sent Identify twice, ignoring", identifier_recv);
                    }
                    Err(e) => {
                        warn!("{} ({}) bad command: {}", identifier_recv, conn_id, e);
                        recv_state
                            .dispatcher
                            .send_to_connection(
                                conn_id,
                                GatewayEvent::Error {
                                    message: e.to_string(),
                                },
                            )
                            .await;
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

    state.dispatcher.unregister(conn_id).await;
    info!(
        "{} ({}) disconnected from gateway, {} online",
        identifier,
        conn_id,
        state.dispatcher.online_count().await
    );
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        error!("Failed to encode gateway event: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<PlayerSession> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
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
                    .map_err(|e| warn!("Rejected Identify token: {}", e))
                    .ok()?;

                    return Some(PlayerSession {
                        identifier: token_data.claims.sub,
                        phone_number: token_data.claims.phone_number,
                    });
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}
