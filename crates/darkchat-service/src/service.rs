use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use darkchat_types::api::{
    ChannelIdRequest, ChannelItem, ChannelMessage, CreateMessageRequest, DarkchatRequest,
    GENERIC_DB_ERROR, JoinChannelRequest, ServiceResponse, UpdateLabelRequest,
};
use darkchat_types::events::{BroadcastPayload, GatewayEvent};
use darkchat_types::models::{ConnectionId, PlayerSession};

use crate::convert;
use crate::directory::PlayerDirectory;
use crate::error::ServiceError;
use crate::responder::{Outbound, Responder};
use crate::store::ChannelStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceOptions {
    /// Reply with `GENERIC_DB_ERROR` from every handler instead of the
    /// underlying error text.
    pub redact_errors: bool,
}

/// How much of a failure a handler passes back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Generic,
    Underlying,
}

pub struct ChannelService {
    store: Arc<dyn ChannelStore>,
    directory: Arc<dyn PlayerDirectory>,
    outbound: Arc<dyn Outbound>,
    options: ServiceOptions,
}

impl ChannelService {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        directory: Arc<dyn PlayerDirectory>,
        outbound: Arc<dyn Outbound>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            store,
            directory,
            outbound,
            options,
        }
    }

    /// Route one request from `conn` to its handler.
    pub async fn handle(&self, conn: ConnectionId, request_id: u64, request: DarkchatRequest) {
        debug!("{} request {} from {}", request.name(), request_id, conn);

        match request {
            DarkchatRequest::GetAllChannels => {
                self.get_all_channels(conn, self.responder(conn, request_id)).await
            }
            DarkchatRequest::GetChannelMessages(req) => {
                self.get_channel_messages(conn, req, self.responder(conn, request_id))
                    .await
            }
            DarkchatRequest::JoinChannel(req) => {
                self.join_channel(conn, req, self.responder(conn, request_id)).await
            }
            DarkchatRequest::CreateMessage(req) => {
                self.create_message(conn, req, self.responder(conn, request_id)).await
            }
            DarkchatRequest::LeaveChannel(req) => {
                self.leave_channel(conn, req, self.responder(conn, request_id)).await
            }
            DarkchatRequest::UpdateChannelLabel(req) => {
                self.update_channel_label(conn, req, self.responder(conn, request_id))
                    .await
            }
        }
    }

    pub async fn get_all_channels(&self, source: ConnectionId, resp: Responder<Vec<ChannelItem>>) {
        let result = async {
            let identifier = self.caller_identifier(source).await?;
            let rows = self.store.channels_for_player(&identifier).await?;
            Ok::<_, ServiceError>(rows.into_iter().map(convert::channel_item).collect::<Vec<_>>())
        }
        .await;

        resp.send(self.reply(result, "fetch channels", Detail::Generic))
            .await;
    }

    pub async fn get_channel_messages(
        &self,
        source: ConnectionId,
        req: ChannelIdRequest,
        resp: Responder<Vec<ChannelMessage>>,
    ) {
        let result = async {
            let identifier = self.caller_identifier(source).await?;
            let rows = self.store.channel_messages(req.channel_id).await?;

            let messages: Vec<_> = rows
                .into_iter()
                .map(|row| {
                    let is_mine = row.identifier == identifier;
                    convert::channel_message(row, is_mine)
                })
                .collect();
            Ok::<_, ServiceError>(messages)
        }
        .await;

        resp.send(self.reply(result, "fetch channel messages", Detail::Underlying))
            .await;
    }

    pub async fn join_channel(
        &self,
        source: ConnectionId,
        req: JoinChannelRequest,
        resp: Responder<ChannelItem>,
    ) {
        let result = self.join_channel_inner(source, req).await;
        resp.send(self.reply(result, "join channel", Detail::Underlying))
            .await;
    }

    async fn join_channel_inner(
        &self,
        source: ConnectionId,
        req: JoinChannelRequest,
    ) -> Result<ChannelItem, ServiceError> {
        let identifier = self.caller_identifier(source).await?;
        let channel_identifier = req.channel_identifier;
        if channel_identifier.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("channel identifier is empty"));
        }

        let mut is_owner = false;
        if !self.store.channel_exists(&channel_identifier).await? {
            self.store.create_channel(&channel_identifier).await?;
            info!("{} created channel '{}'", identifier, channel_identifier);
            is_owner = true;
        }

        let (id, label) = self.store.channel_id_and_label(&channel_identifier).await?;

        // Channels can exist without an owner on record; whoever joins next takes it.
        let members = self.store.channel_members(id).await?;
        if !members.iter().any(|m| m.is_owner) {
            is_owner = true;
        }

        let channel_id = self
            .store
            .join_channel(&channel_identifier, &identifier, is_owner)
            .await?;

        let owner = match self.store.channel_owner(id).await? {
            Some(owner) => self.directory.phone_number_for_identifier(&owner).await?,
            None => None,
        };

        Ok(ChannelItem {
            id: channel_id,
            label: Some(label.unwrap_or_else(|| channel_identifier.clone())),
            identifier: channel_identifier,
            owner,
        })
    }

    pub async fn create_message(
        &self,
        source: ConnectionId,
        req: CreateMessageRequest,
        resp: Responder<ChannelMessage>,
    ) {
        let persisted = async {
            let session = self.caller_session(source).await?;
            let row = self
                .store
                .create_message(req.channel_id, &session.identifier, &req.message)
                .await?;
            Ok::<_, ServiceError>((session, row))
        }
        .await;

        let (session, row) = match persisted {
            Ok(persisted) => persisted,
            Err(e) => {
                resp.send(self.failure(&e, "create message", Detail::Underlying))
                    .await;
                return;
            }
        };

        // The sending connection's phone, not whatever the identifier last used.
        let is_mine = session.phone_number == req.phone_number;
        let message = convert::channel_message(row, is_mine);

        resp.send(ServiceResponse::ok(message.clone())).await;

        let claimed = req.phone_number.as_str();
        let fan_out = self
            .fan_out(req.channel_id, &session.identifier, |recipient_phone| {
                BroadcastPayload::Message(ChannelMessage {
                    is_mine: recipient_phone == claimed,
                    ..message.clone()
                })
            })
            .await;

        if let Err(e) = fan_out {
            warn!(
                "Message {} in channel {} saved but not broadcast: {}",
                message.id, req.channel_id, e
            );
        }
    }

    pub async fn leave_channel(&self, source: ConnectionId, req: ChannelIdRequest, resp: Responder<()>) {
        let result = async {
            let identifier = self.caller_identifier(source).await?;
            self.store.leave_channel(req.channel_id, &identifier).await?;
            info!("{} left channel {}", identifier, req.channel_id);
            Ok::<_, ServiceError>(())
        }
        .await;

        resp.send(self.reply(result, "leave channel", Detail::Underlying))
            .await;
    }

    pub async fn update_channel_label(
        &self,
        source: ConnectionId,
        req: UpdateLabelRequest,
        resp: Responder<()>,
    ) {
        let result = async {
            let identifier = self.caller_identifier(source).await?;
            self.store
                .update_channel_label(req.channel_id, &req.label)
                .await?;
            Ok::<_, ServiceError>(identifier)
        }
        .await;

        let identifier = match result {
            Ok(identifier) => identifier,
            Err(e) => {
                resp.send(self.failure(&e, "update channel label", Detail::Underlying))
                    .await;
                return;
            }
        };

        resp.send(ServiceResponse::ok(())).await;

        let fan_out = self
            .fan_out(req.channel_id, &identifier, |_| {
                BroadcastPayload::LabelUpdate(req.clone())
            })
            .await;

        if let Err(e) = fan_out {
            warn!("Label of channel {} saved but not broadcast: {}", req.channel_id, e);
        }
    }

    /// Push a payload to every online member of `channel_id` except `sender`.
    /// `payload_for` gets the phone number of the receiving session. Returns how many
    /// connections the payload was queued for.
    async fn fan_out<F>(&self, channel_id: i64, sender: &str, payload_for: F) -> Result<usize, ServiceError>
    where
        F: Fn(&str) -> BroadcastPayload + Send + Sync,
    {
        let members = self.store.channel_members(channel_id).await?;
        let mut delivered = 0;

        for member in members.iter().filter(|m| m.identifier != sender) {
            let Some(conn) = self.directory.connection_for_identifier(&member.identifier).await else {
                continue;
            };

            // Gone between the two lookups
            let Some(recipient) = self.directory.session_for_connection(conn).await else {
                continue;
            };

            let event = GatewayEvent::BroadcastMessage(payload_for(&recipient.phone_number));
            if self.outbound.send(conn, event).await {
                delivered += 1;
            }
        }

        debug!("Broadcast in channel {} reached {} members", channel_id, delivered);
        Ok(delivered)
    }

    async fn caller_session(&self, conn: ConnectionId) -> Result<PlayerSession, ServiceError> {
        self.directory
            .session_for_connection(conn)
            .await
            .ok_or(ServiceError::UnknownSession(conn))
    }

    async fn caller_identifier(&self, conn: ConnectionId) -> Result<String, ServiceError> {
        Ok(self.caller_session(conn).await?.identifier)
    }

    fn responder<T: Serialize>(&self, conn: ConnectionId, request_id: u64) -> Responder<T> {
        Responder::new(conn, request_id, self.outbound.clone())
    }

    fn reply<T>(&self, result: Result<T, ServiceError>, action: &str, detail: Detail) -> ServiceResponse<T> {
        match result {
            Ok(data) => ServiceResponse::ok(data),
            Err(e) => self.failure(&e, action, detail),
        }
    }

    fn failure<T>(&self, err: &ServiceError, action: &str, detail: Detail) -> ServiceResponse<T> {
        error!("Failed to {}: {}", action, err);

        if detail == Detail::Generic || self.options.redact_errors {
            ServiceResponse::error(GENERIC_DB_ERROR)
        } else {
            ServiceResponse::error(err.to_string())
        }
    }
}
