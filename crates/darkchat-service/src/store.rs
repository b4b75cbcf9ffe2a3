use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::error;

use darkchat_db::Database;
use darkchat_db::models::{ChannelRow, MemberRow, MessageRow};

/// Persistence the channel service depends on.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn channels_for_player(&self, identifier: &str) -> Result<Vec<ChannelRow>>;

    async fn channel_messages(&self, channel_id: i64) -> Result<Vec<MessageRow>>;

    async fn channel_exists(&self, channel_identifier: &str) -> Result<bool>;

    async fn create_channel(&self, channel_identifier: &str) -> Result<()>;

    async fn channel_id_and_label(&self, channel_identifier: &str) -> Result<(i64, Option<String>)>;

    async fn channel_members(&self, channel_id: i64) -> Result<Vec<MemberRow>>;

    /// Upsert a membership and return the channel id. Must never leave the
    /// channel with two owners, and must promote the joiner when it has none.
    async fn join_channel(&self, channel_identifier: &str, identifier: &str, is_owner: bool) -> Result<i64>;

    async fn channel_owner(&self, channel_id: i64) -> Result<Option<String>>;

    async fn create_message(&self, channel_id: i64, identifier: &str, message: &str) -> Result<MessageRow>;

    async fn leave_channel(&self, channel_id: i64, identifier: &str) -> Result<()>;

    async fn update_channel_label(&self, channel_id: i64, label: &str) -> Result<()>;
}

/// [`ChannelStore`] over the SQLite database. Every call runs on the
/// blocking pool so a slow disk never stalls the gateway.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("spawn_blocking join error: {}", e)
            })?
    }
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn channels_for_player(&self, identifier: &str) -> Result<Vec<ChannelRow>> {
        let identifier = identifier.to_string();
        self.blocking(move |db| db.get_channels_for_player(&identifier)).await
    }

    async fn channel_messages(&self, channel_id: i64) -> Result<Vec<MessageRow>> {
        self.blocking(move |db| db.get_channel_messages(channel_id)).await
    }

    async fn channel_exists(&self, channel_identifier: &str) -> Result<bool> {
        let channel_identifier = channel_identifier.to_string();
        self.blocking(move |db| db.channel_exists(&channel_identifier)).await
    }

    async fn create_channel(&self, channel_identifier: &str) -> Result<()> {
        let channel_identifier = channel_identifier.to_string();
        self.blocking(move |db| db.create_channel(&channel_identifier)).await
    }

    async fn channel_id_and_label(&self, channel_identifier: &str) -> Result<(i64, Option<String>)> {
        let channel_identifier = channel_identifier.to_string();
        self.blocking(move |db| db.get_channel_id_and_label(&channel_identifier))
            .await
    }

    async fn channel_members(&self, channel_id: i64) -> Result<Vec<MemberRow>> {
        self.blocking(move |db| db.get_channel_members(channel_id)).await
    }

    async fn join_channel(&self, channel_identifier: &str, identifier: &str, is_owner: bool) -> Result<i64> {
        let channel_identifier = channel_identifier.to_string();
        let identifier = identifier.to_string();
        self.blocking(move |db| db.join_channel(&channel_identifier, &identifier, is_owner))
            .await
    }

    async fn channel_owner(&self, channel_id: i64) -> Result<Option<String>> {
        self.blocking(move |db| db.get_channel_owner(channel_id)).await
    }

    async fn create_message(&self, channel_id: i64, identifier: &str, message: &str) -> Result<MessageRow> {
        let identifier = identifier.to_string();
        let message = message.to_string();
        self.blocking(move |db| db.create_message(channel_id, &identifier, &message))
            .await
    }

    async fn leave_channel(&self, channel_id: i64, identifier: &str) -> Result<()> {
        let identifier = identifier.to_string();
        self.blocking(move |db| db.leave_channel(channel_id, &identifier)).await
    }

    async fn update_channel_label(&self, channel_id: i64, label: &str) -> Result<()> {
        let label = label.to_string();
        self.blocking(move |db| db.update_channel_label(channel_id, &label)).await
    }
}
