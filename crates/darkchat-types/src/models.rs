use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle for one live gateway connection. Distinct from the player's
/// identifier: a reconnect gets a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is behind a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    pub identifier: String,
    pub phone_number: String,
}
