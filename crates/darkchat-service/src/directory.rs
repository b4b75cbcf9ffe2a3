use anyhow::Result;
use async_trait::async_trait;

use darkchat_types::models::{ConnectionId, PlayerSession};

/// Lookups between live connections, stable identifiers and phone numbers.
///
/// Connection lookups only ever see players who are online right now.
/// Phone lookups may also answer for offline players.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// The session behind one connection. Several connections may share an
    /// identifier, each with its own phone number.
    async fn session_for_connection(&self, conn: ConnectionId) -> Option<PlayerSession>;

    async fn connection_for_identifier(&self, identifier: &str) -> Option<ConnectionId>;

    async fn phone_number_for_identifier(&self, identifier: &str) -> Result<Option<String>>;

    async fn identifier_for_phone_number(&self, phone_number: &str) -> Result<Option<String>>;
}
