use serde::{Deserialize, Serialize};

use crate::api::{ChannelMessage, DarkchatRequest, UpdateLabelRequest};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the Identify handshake
    Ready {
        identifier: String,
        phone_number: String,
    },

    /// Reply to a single request, matched by `request_id`
    Response {
        request_id: u64,
        response: serde_json::Value,
    },

    /// One-way push to a channel member
    BroadcastMessage(BroadcastPayload),

    /// The last command frame could not be understood
    Error { message: String },
}

/// Everything delivered under the shared broadcast event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BroadcastPayload {
    Message(ChannelMessage),
    LabelUpdate(UpdateLabelRequest),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Run a channel service operation
    Request {
        request_id: u64,
        request: DarkchatRequest,
    },
}
