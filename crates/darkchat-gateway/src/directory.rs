use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use darkchat_db::Database;
use darkchat_service::PlayerDirectory;
use darkchat_types::models::{ConnectionId, PlayerSession};

use crate::dispatcher::Dispatcher;

/// Player directory backed by live gateway sessions, falling back to the
/// players table for anyone offline.
#[derive(Clone)]
pub struct GatewayDirectory {
    dispatcher: Dispatcher,
    db: Arc<Database>,
}

impl GatewayDirectory {
    pub fn new(dispatcher: Dispatcher, db: Arc<Database>) -> Self {
        Self { dispatcher, db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }
}

#[async_trait]
impl PlayerDirectory for GatewayDirectory {
    async fn session_for_connection(&self, conn: ConnectionId) -> Option<PlayerSession> {
        self.dispatcher.session(conn).await
    }

    async fn connection_for_identifier(&self, identifier: &str) -> Option<ConnectionId> {
        self.dispatcher.connection_for(identifier).await
    }

    async fn phone_number_for_identifier(&self, identifier: &str) -> Result<Option<String>> {
        if let Some(conn) = self.dispatcher.connection_for(identifier).await {
            if let Some(session) = self.dispatcher.session(conn).await {
                return Ok(Some(session.phone_number));
            }
        }

        let identifier = identifier.to_string();
        self.blocking(move |db| db.get_phone_number(&identifier)).await
    }

    async fn identifier_for_phone_number(&self, phone_number: &str) -> Result<Option<String>> {
        if let Some(identifier) = self.dispatcher.identifier_for_phone_number(phone_number).await {
            return Ok(Some(identifier));
        }

        let phone_number = phone_number.to_string();
        self.blocking(move |db| db.get_identifier_by_phone_number(&phone_number))
            .await
    }
}
