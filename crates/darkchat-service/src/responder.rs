use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use darkchat_types::api::ServiceResponse;
use darkchat_types::events::GatewayEvent;
use darkchat_types::models::ConnectionId;

/// Delivery of events to live connections.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Queue an event for one connection. Returns false when the connection
    /// is gone; the event is dropped in that case.
    async fn send(&self, conn: ConnectionId, event: GatewayEvent) -> bool;
}

/// Reply handle for exactly one request. Consumed on send.
pub struct Responder<T> {
    conn: ConnectionId,
    request_id: u64,
    outbound: Arc<dyn Outbound>,
    _reply: PhantomData<fn(T)>,
}

impl<T: Serialize> Responder<T> {
    pub fn new(conn: ConnectionId, request_id: u64, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            conn,
            request_id,
            outbound,
            _reply: PhantomData,
        }
    }

    pub async fn send(self, response: ServiceResponse<T>) {
        let response = match serde_json::to_value(&response) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to encode response {}: {}", self.request_id, e);
                return;
            }
        };

        self.outbound
            .send(
                self.conn,
                GatewayEvent::Response {
                    request_id: self.request_id,
                    response,
                },
            )
            .await;
    }
}
