use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use darkchat_service::Outbound;
use darkchat_types::events::GatewayEvent;
use darkchat_types::models::{ConnectionId, PlayerSession};

struct Session {
    player: PlayerSession,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Tracks every live connection and delivers events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Live connections: conn_id -> session
    sessions: RwLock<HashMap<ConnectionId, Session>>,

    /// Newest connection per player: identifier -> conn_id
    connections: RwLock<HashMap<String, ConnectionId>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a new connection for a player. Returns (conn_id, receiver).
    /// A newer connection takes over lookups by identifier.
    pub async fn register(
        &self,
        player: PlayerSession,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let identifier = player.identifier.clone();

        self.inner
            .sessions
            .write()
            .await
            .insert(conn_id, Session { player, tx });
        self.inner
            .connections
            .write()
            .await
            .insert(identifier, conn_id);

        (conn_id, rx)
    }

    /// Forget a connection. The identifier mapping is only removed if it
    /// still points at this connection.
    pub async fn unregister(&self, conn_id: ConnectionId) {
        let removed = self.inner.sessions.write().await.remove(&conn_id);

        if let Some(session) = removed {
            let mut connections = self.inner.connections.write().await;
            if connections.get(&session.player.identifier) == Some(&conn_id) {
                connections.remove(&session.player.identifier);
            }
        }
    }

    pub async fn session(&self, conn_id: ConnectionId) -> Option<PlayerSession> {
        self.inner
            .sessions
            .read()
            .await
            .get(&conn_id)
            .map(|s| s.player.clone())
    }

    pub async fn connection_for(&self, identifier: &str) -> Option<ConnectionId> {
        self.inner.connections.read().await.get(identifier).copied()
    }

    /// Identifier of the online player using `phone_number`, if any.
    pub async fn identifier_for_phone_number(&self, phone_number: &str) -> Option<String> {
        let connections = self.inner.connections.read().await;
        let sessions = self.inner.sessions.read().await;

        connections.values().find_map(|conn_id| {
            sessions
                .get(conn_id)
                .filter(|s| s.player.phone_number == phone_number)
                .map(|s| s.player.identifier.clone())
        })
    }

    /// Send a targeted event to one connection.
    pub async fn send_to_connection(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&conn_id) {
            Some(session) => session.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Number of players with a live connection.
    pub async fn online_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbound for Dispatcher {
    async fn send(&self, conn: ConnectionId, event: GatewayEvent) -> bool {
        self.send_to_connection(conn, event).await
    }
}
