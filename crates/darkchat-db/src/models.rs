/// Database row types. These map directly to SQLite rows.
/// Distinct from darkchat-types API models to keep the DB layer independent.

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub id: i64,
    pub identifier: String,
    pub label: Option<String>,
    /// Owner's phone number from the players table, if known.
    pub owner_phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberRow {
    pub channel_id: i64,
    pub identifier: String,
    pub is_owner: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub identifier: String,
    pub phone_number: Option<String>,
    pub message: String,
    pub created_at: String,
}
