//! Client side of the darkchat gateway.
//!
//! [`DarkchatClient::connect`] resolves only once the server has accepted the
//! Identify handshake, so callers never observe a half-initialised client.
//! Each typed method sends one request and waits for its reply; broadcasts
//! arrive separately through [`DarkchatClient::next_broadcast`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use darkchat_types::api::{
    ChannelIdRequest, ChannelItem, ChannelMessage, CreateMessageRequest, DarkchatRequest,
    JoinChannelRequest, ServiceResponse, UpdateLabelRequest,
};
use darkchat_types::events::{BroadcastPayload, GatewayCommand, GatewayEvent};
use darkchat_types::models::PlayerSession;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out waiting for the server")]
    Timeout,

    /// The server answered with an error status.
    #[error("{0}")]
    Service(String),
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

pub struct DarkchatClient {
    session: PlayerSession,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    broadcasts: mpsc::UnboundedReceiver<BroadcastPayload>,
    next_request: AtomicU64,
    reader: JoinHandle<()>,
}

impl DarkchatClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:3100/gateway`) and identify
    /// with a signed session token.
    pub async fn connect(url: &str, token: &str) -> Result<Self, ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();

        let identify = GatewayCommand::Identify {
            token: token.to_string(),
        };
        sink.send(Message::text(serde_json::to_string(&identify)?))
            .await?;

        let session = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(msg) = stream.next().await {
                let Message::Text(text) = msg? else { continue };
                match serde_json::from_str::<GatewayEvent>(text.as_str())? {
                    GatewayEvent::Ready {
                        identifier,
                        phone_number,
                    } => {
                        return Ok(PlayerSession {
                            identifier,
                            phone_number,
                        });
                    }
                    other => debug!("Ignoring {:?} before Ready", other),
                }
            }
            Err::<PlayerSession, ClientError>(ClientError::Closed)
        })
        .await
        .map_err(|_| ClientError::Timeout)??;

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (broadcast_tx, broadcasts) = mpsc::unbounded_channel();
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                let Message::Text(text) = msg else { continue };
                match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                    Ok(GatewayEvent::Response {
                        request_id,
                        response,
                    }) => {
                        if let Some(tx) = reader_pending.lock().await.remove(&request_id) {
                            let _ = tx.send(response);
                        }
                    }
                    Ok(GatewayEvent::BroadcastMessage(payload)) => {
                        let _ = broadcast_tx.send(payload);
                    }
                    Ok(GatewayEvent::Error { message }) => {
                        warn!("Gateway rejected a frame: {}", message);
                    }
                    Ok(GatewayEvent::Ready { .. }) => {}
                    Err(e) => warn!("Unreadable gateway frame: {}", e),
                }
            }
            // Wake every waiter with Closed
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            session,
            outgoing,
            pending,
            broadcasts,
            next_request: AtomicU64::new(0),
            reader,
        })
    }

    /// The identity the server confirmed during the handshake.
    pub fn session(&self) -> &PlayerSession {
        &self.session
    }

    /// Next broadcast pushed by the server, or `None` once disconnected.
    pub async fn next_broadcast(&mut self) -> Option<BroadcastPayload> {
        self.broadcasts.recv().await
    }

    pub async fn get_all_channels(&self) -> Result<Vec<ChannelItem>, ClientError> {
        self.request(DarkchatRequest::GetAllChannels).await
    }

    pub async fn get_channel_messages(&self, channel_id: i64) -> Result<Vec<ChannelMessage>, ClientError> {
        self.request(DarkchatRequest::GetChannelMessages(ChannelIdRequest { channel_id }))
            .await
    }

    pub async fn join_channel(&self, channel_identifier: &str) -> Result<ChannelItem, ClientError> {
        self.request(DarkchatRequest::JoinChannel(JoinChannelRequest {
            channel_identifier: channel_identifier.to_string(),
        }))
        .await
    }

    /// Post a message as the identified player, claiming this session's phone number.
    pub async fn create_message(&self, channel_id: i64, message: &str) -> Result<ChannelMessage, ClientError> {
        self.request(DarkchatRequest::CreateMessage(CreateMessageRequest {
            channel_id,
            message: message.to_string(),
            phone_number: self.session.phone_number.clone(),
        }))
        .await
    }

    pub async fn leave_channel(&self, channel_id: i64) -> Result<(), ClientError> {
        self.request(DarkchatRequest::LeaveChannel(ChannelIdRequest { channel_id }))
            .await
    }

    pub async fn update_channel_label(&self, channel_id: i64, label: &str) -> Result<(), ClientError> {
        self.request(DarkchatRequest::UpdateChannelLabel(UpdateLabelRequest {
            channel_id,
            label: label.to_string(),
        }))
        .await
    }

    /// Send any request and decode its reply.
    pub async fn request<T: DeserializeOwned>(&self, request: DarkchatRequest) -> Result<T, ClientError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = serde_json::to_string(&GatewayCommand::Request {
            request_id,
            request,
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);
        if self.outgoing.send(Message::text(frame)).is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(ClientError::Closed);
        }

        let value = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                return Err(ClientError::Timeout);
            }
        };

        let response: ServiceResponse<T> = serde_json::from_value(value)?;
        response.into_result().map_err(ClientError::Service)
    }
}

impl Drop for DarkchatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
