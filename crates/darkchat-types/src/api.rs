use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error code returned when store detail must not reach the client.
pub const GENERIC_DB_ERROR: &str = "GENERIC_DB_ERROR";

// -- Identify token --

/// JWT claims carried by the Identify handshake. The game server signs these
/// for each player session with the shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable player identifier.
    pub sub: String,
    pub phone_number: String,
    pub exp: usize,
}

// -- Response envelope --

/// Tagged result sent back for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServiceResponse<T> {
    Ok {
        data: T,
    },
    Error {
        #[serde(rename = "errorMsg")]
        error_msg: String,
    },
}

impl<T> ServiceResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            error_msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Ok { data } => Ok(data),
            Self::Error { error_msg } => Err(error_msg),
        }
    }
}

// -- Requests --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelIdRequest {
    pub channel_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinChannelRequest {
    pub channel_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateMessageRequest {
    pub channel_id: i64,
    pub message: String,
    /// Phone number the client claims to be sending from.
    pub phone_number: String,
}

/// Rename request; also the payload broadcast to other members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateLabelRequest {
    pub channel_id: i64,
    pub label: String,
}

/// Every operation the channel service answers, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum DarkchatRequest {
    GetAllChannels,
    GetChannelMessages(ChannelIdRequest),
    JoinChannel(JoinChannelRequest),
    CreateMessage(CreateMessageRequest),
    LeaveChannel(ChannelIdRequest),
    UpdateChannelLabel(UpdateLabelRequest),
}

impl DarkchatRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAllChannels => "GetAllChannels",
            Self::GetChannelMessages(_) => "GetChannelMessages",
            Self::JoinChannel(_) => "JoinChannel",
            Self::CreateMessage(_) => "CreateMessage",
            Self::LeaveChannel(_) => "LeaveChannel",
            Self::UpdateChannelLabel(_) => "UpdateChannelLabel",
        }
    }
}

// -- Responses --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelItem {
    pub id: i64,
    pub identifier: String,
    pub label: Option<String>,
    /// Owner's phone number, when it can be resolved.
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: i64,
    pub channel_id: i64,
    /// Author's stable identifier.
    pub identifier: String,
    pub phone_number: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
}
