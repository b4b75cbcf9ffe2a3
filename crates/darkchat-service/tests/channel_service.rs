use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use darkchat_db::Database;
use darkchat_db::models::{ChannelRow, MemberRow, MessageRow};
use darkchat_service::{
    ChannelService, ChannelStore, Outbound, PlayerDirectory, ServiceOptions, SqliteStore,
};
use darkchat_types::api::{
    ChannelIdRequest, ChannelItem, ChannelMessage, CreateMessageRequest, DarkchatRequest,
    GENERIC_DB_ERROR, JoinChannelRequest, ServiceResponse, UpdateLabelRequest,
};
use darkchat_types::events::{BroadcastPayload, GatewayEvent};
use darkchat_types::models::{ConnectionId, PlayerSession};

/// Live sessions in a map; phones of offline players come from the database.
struct TestDirectory {
    db: Arc<Database>,
    sessions: Mutex<HashMap<ConnectionId, PlayerSession>>,
}

impl TestDirectory {
    fn connect(&self, identifier: &str, phone_number: &str) -> ConnectionId {
        self.db.upsert_player(identifier, phone_number).unwrap();
        let conn = ConnectionId::new();
        self.sessions.lock().unwrap().insert(
            conn,
            PlayerSession {
                identifier: identifier.into(),
                phone_number: phone_number.into(),
            },
        );
        conn
    }

    fn disconnect(&self, conn: ConnectionId) {
        self.sessions.lock().unwrap().remove(&conn);
    }
}

#[async_trait]
impl PlayerDirectory for TestDirectory {
    async fn session_for_connection(&self, conn: ConnectionId) -> Option<PlayerSession> {
        self.sessions.lock().unwrap().get(&conn).cloned()
    }

    async fn connection_for_identifier(&self, identifier: &str) -> Option<ConnectionId> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|(_, s)| s.identifier == identifier)
            .map(|(conn, _)| *conn)
    }

    async fn phone_number_for_identifier(&self, identifier: &str) -> Result<Option<String>> {
        self.db.get_phone_number(identifier)
    }

    async fn identifier_for_phone_number(&self, phone_number: &str) -> Result<Option<String>> {
        self.db.get_identifier_by_phone_number(phone_number)
    }
}

#[derive(Default)]
struct RecordingOutbound {
    events: Mutex<Vec<(ConnectionId, GatewayEvent)>>,
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, conn: ConnectionId, event: GatewayEvent) -> bool {
        self.events.lock().unwrap().push((conn, event));
        true
    }
}

struct FailingStore;

#[async_trait]
impl ChannelStore for FailingStore {
    async fn channels_for_player(&self, _: &str) -> Result<Vec<ChannelRow>> {
        Err(anyhow!("database is locked"))
    }
    async fn channel_messages(&self, _: i64) -> Result<Vec<MessageRow>> {
        Err(anyhow!("database is locked"))
    }
    async fn channel_exists(&self, _: &str) -> Result<bool> {
        Err(anyhow!("database is locked"))
    }
    async fn create_channel(&self, _: &str) -> Result<()> {
        Err(anyhow!("database is locked"))
    }
    async fn channel_id_and_label(&self, _: &str) -> Result<(i64, Option<String>)> {
        Err(anyhow!("database is locked"))
    }
    async fn channel_members(&self, _: i64) -> Result<Vec<MemberRow>> {
        Err(anyhow!("database is locked"))
    }
    async fn join_channel(&self, _: &str, _: &str, _: bool) -> Result<i64> {
        Err(anyhow!("database is locked"))
    }
    async fn channel_owner(&self, _: i64) -> Result<Option<String>> {
        Err(anyhow!("database is locked"))
    }
    async fn create_message(&self, _: i64, _: &str, _: &str) -> Result<MessageRow> {
        Err(anyhow!("database is locked"))
    }
    async fn leave_channel(&self, _: i64, _: &str) -> Result<()> {
        Err(anyhow!("database is locked"))
    }
    async fn update_channel_label(&self, _: i64, _: &str) -> Result<()> {
        Err(anyhow!("database is locked"))
    }
}

struct Harness {
    db: Arc<Database>,
    directory: Arc<TestDirectory>,
    outbound: Arc<RecordingOutbound>,
    service: ChannelService,
    next_request: u64,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::with_store(db.clone(), Arc::new(SqliteStore::new(db)), ServiceOptions::default())
    }

    fn failing(options: ServiceOptions) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::with_store(db, Arc::new(FailingStore), options)
    }

    fn with_store(db: Arc<Database>, store: Arc<dyn ChannelStore>, options: ServiceOptions) -> Self {
        let directory = Arc::new(TestDirectory {
            db: db.clone(),
            sessions: Mutex::new(HashMap::new()),
        });
        let outbound = Arc::new(RecordingOutbound::default());
        let service = ChannelService::new(store, directory.clone(), outbound.clone(), options);
        Self {
            db,
            directory,
            outbound,
            service,
            next_request: 0,
        }
    }

    /// Run a request and return its reply plus everything else sent meanwhile.
    async fn call<T: DeserializeOwned>(
        &mut self,
        conn: ConnectionId,
        request: DarkchatRequest,
    ) -> (ServiceResponse<T>, Vec<(ConnectionId, GatewayEvent)>) {
        self.next_request += 1;
        let request_id = self.next_request;
        self.service.handle(conn, request_id, request).await;

        let events = std::mem::take(&mut *self.outbound.events.lock().unwrap());
        let mut reply = None;
        let mut others = Vec::new();
        for (to, event) in events {
            match event {
                GatewayEvent::Response {
                    request_id: id,
                    response,
                } if id == request_id => {
                    assert_eq!(to, conn, "reply went to the wrong connection");
                    assert!(reply.is_none(), "request answered twice");
                    assert!(others.is_empty(), "broadcast sent before the reply");
                    reply = Some(serde_json::from_value(response).unwrap());
                }
                other => others.push((to, other)),
            }
        }
        (reply.expect("request was never answered"), others)
    }

    async fn join(&mut self, conn: ConnectionId, channel_identifier: &str) -> ChannelItem {
        let (resp, _) = self
            .call::<ChannelItem>(
                conn,
                DarkchatRequest::JoinChannel(JoinChannelRequest {
                    channel_identifier: channel_identifier.into(),
                }),
            )
            .await;
        resp.into_result().unwrap()
    }
}

fn send(channel_id: i64, message: &str, phone_number: &str) -> DarkchatRequest {
    DarkchatRequest::CreateMessage(CreateMessageRequest {
        channel_id,
        message: message.into(),
        phone_number: phone_number.into(),
    })
}

#[tokio::test]
async fn joining_a_new_channel_makes_caller_the_only_owner() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");

    let channel = h.join(p1, "alpha").await;
    assert_eq!(channel.identifier, "alpha");
    assert_eq!(channel.label.as_deref(), Some("alpha"));
    assert_eq!(channel.owner.as_deref(), Some("555-0101"));

    let members = h.db.get_channel_members(channel.id).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].identifier, "license:p1");
    assert!(members[0].is_owner);
}

#[tokio::test]
async fn second_joiner_is_not_owner_and_leaving_does_not_promote() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");

    let first = h.join(p1, "alpha").await;
    let second = h.join(p2, "alpha").await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.owner.as_deref(), Some("555-0101"));

    let (resp, _) = h
        .call::<()>(p1, DarkchatRequest::LeaveChannel(ChannelIdRequest { channel_id: first.id }))
        .await;
    assert!(resp.is_ok());

    let members = h.db.get_channel_members(first.id).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].identifier, "license:p2");
    assert!(!members[0].is_owner);
}

#[tokio::test]
async fn ownerless_channel_is_claimed_by_next_joiner() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");
    let p3 = h.directory.connect("license:p3", "555-0103");

    let channel = h.join(p1, "alpha").await;
    h.join(p2, "alpha").await;
    h.call::<()>(p1, DarkchatRequest::LeaveChannel(ChannelIdRequest { channel_id: channel.id }))
        .await;

    let rejoined = h.join(p3, "alpha").await;
    assert_eq!(rejoined.owner.as_deref(), Some("555-0103"));
    assert_eq!(
        h.db.get_channel_owner(channel.id).unwrap().as_deref(),
        Some("license:p3")
    );
}

#[tokio::test]
async fn owner_phone_resolves_for_offline_owner() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");

    h.join(p1, "alpha").await;
    h.directory.disconnect(p1);

    let channel = h.join(p2, "alpha").await;
    assert_eq!(channel.owner.as_deref(), Some("555-0101"));
}

#[tokio::test]
async fn stored_label_is_returned_on_join() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");

    let channel = h.join(p1, "alpha").await;
    h.db.update_channel_label(channel.id, "Back Alley").unwrap();

    let joined = h.join(p2, "alpha").await;
    assert_eq!(joined.label.as_deref(), Some("Back Alley"));
    assert_eq!(joined.identifier, "alpha");
}

#[tokio::test]
async fn blank_channel_identifier_is_rejected() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");

    let (resp, _) = h
        .call::<ChannelItem>(
            p1,
            DarkchatRequest::JoinChannel(JoinChannelRequest {
                channel_identifier: "   ".into(),
            }),
        )
        .await;
    assert!(!resp.is_ok());
    assert!(!h.db.channel_exists("   ").unwrap());
}

#[tokio::test]
async fn message_list_marks_only_callers_messages() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");

    let channel = h.join(p1, "alpha").await;
    h.join(p2, "alpha").await;
    h.call::<ChannelMessage>(p1, send(channel.id, "anyone around?", "555-0101"))
        .await;
    // A bogus phone number must not change ownership of the message in listings
    h.call::<ChannelMessage>(p2, send(channel.id, "here", "555-9999"))
        .await;

    let (resp, _) = h
        .call::<Vec<ChannelMessage>>(
            p1,
            DarkchatRequest::GetChannelMessages(ChannelIdRequest { channel_id: channel.id }),
        )
        .await;
    let messages = resp.into_result().unwrap();
    let mine: Vec<_> = messages.iter().map(|m| (m.message.as_str(), m.is_mine)).collect();
    assert_eq!(mine, vec![("anyone around?", true), ("here", false)]);
    assert_eq!(messages[1].phone_number.as_deref(), Some("555-0102"));
}

#[tokio::test]
async fn create_message_replies_first_then_reaches_online_members_only() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");
    let p3 = h.directory.connect("license:p3", "555-0103");

    let channel = h.join(p1, "alpha").await;
    h.join(p2, "alpha").await;
    h.join(p3, "alpha").await;
    h.directory.disconnect(p3);

    // `call` asserts the reply precedes every broadcast
    let (resp, broadcasts) = h
        .call::<ChannelMessage>(p1, send(channel.id, "meet at the docks", "555-0101"))
        .await;
    let sent = resp.into_result().unwrap();
    assert!(sent.is_mine);
    assert_eq!(sent.channel_id, channel.id);
    assert_eq!(sent.identifier, "license:p1");

    assert_eq!(broadcasts.len(), 1);
    let (to, event) = &broadcasts[0];
    assert_eq!(*to, p2);
    match event {
        GatewayEvent::BroadcastMessage(BroadcastPayload::Message(copy)) => {
            assert_eq!(copy.id, sent.id);
            assert_eq!(copy.message, "meet at the docks");
            assert!(!copy.is_mine);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn mismatched_phone_number_clears_is_mine_for_author() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let channel = h.join(p1, "alpha").await;

    let (resp, _) = h
        .call::<ChannelMessage>(p1, send(channel.id, "hello", "555-4242"))
        .await;
    let sent = resp.into_result().unwrap();
    assert!(!sent.is_mine);
    assert_eq!(sent.identifier, "license:p1");
}

#[tokio::test]
async fn is_mine_uses_the_sending_connections_phone() {
    let mut h = Harness::new();
    let old = h.directory.connect("license:p1", "555-0101");
    // Same player on a second connection with another phone; the stored phone follows it
    let newer = h.directory.connect("license:p1", "555-0199");
    let channel = h.join(old, "alpha").await;

    let (resp, _) = h
        .call::<ChannelMessage>(old, send(channel.id, "from the old session", "555-0101"))
        .await;
    assert!(resp.into_result().unwrap().is_mine);

    let (resp, _) = h
        .call::<ChannelMessage>(newer, send(channel.id, "from the new session", "555-0101"))
        .await;
    assert!(!resp.into_result().unwrap().is_mine);
}

#[tokio::test]
async fn broadcast_is_mine_follows_claimed_phone_number() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");
    let channel = h.join(p1, "alpha").await;
    h.join(p2, "alpha").await;

    let (_, broadcasts) = h
        .call::<ChannelMessage>(p1, send(channel.id, "hello", "555-0102"))
        .await;
    match &broadcasts[0].1 {
        GatewayEvent::BroadcastMessage(BroadcastPayload::Message(copy)) => assert!(copy.is_mine),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn failed_message_write_sends_error_and_no_broadcast() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");

    let (resp, broadcasts) = h
        .call::<ChannelMessage>(p1, send(404, "into the void", "555-0101"))
        .await;
    match resp {
        ServiceResponse::Error { error_msg } => assert!(error_msg.contains("FOREIGN KEY")),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(broadcasts.is_empty());
}

#[tokio::test]
async fn label_update_acks_then_reaches_other_members() {
    let mut h = Harness::new();
    let p1 = h.directory.connect("license:p1", "555-0101");
    let p2 = h.directory.connect("license:p2", "555-0102");
    let p3 = h.directory.connect("license:p3", "555-0103");
    let channel = h.join(p1, "alpha").await;
    h.join(p2, "alpha").await;
    h.join(p3, "alpha").await;
    h.directory.disconnect(p3);

    let update = UpdateLabelRequest {
        channel_id: channel.id,
        label: "Night Market".into(),
    };
    let (resp, broadcasts) = h
        .call::<()>(p1, DarkchatRequest::UpdateChannelLabel(update.clone()))
        .await;
    assert!(resp.is_ok());

    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].0, p2);
    match &broadcasts[0].1 {
        GatewayEvent::BroadcastMessage(BroadcastPayload::LabelUpdate(got)) => {
            assert_eq!(*got, update)
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let (resp, _) = h
        .call::<Vec<ChannelItem>>(p1, DarkchatRequest::GetAllChannels)
        .await;
    let channels = resp.into_result().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].label.as_deref(), Some("Night Market"));
    assert_eq!(channels[0].owner.as_deref(), Some("555-0101"));
}

#[tokio::test]
async fn channel_list_errors_are_generic() {
    let mut h = Harness::failing(ServiceOptions::default());
    let p1 = h.directory.connect("license:p1", "555-0101");

    let (resp, _) = h
        .call::<Vec<ChannelItem>>(p1, DarkchatRequest::GetAllChannels)
        .await;
    assert_eq!(resp, ServiceResponse::error(GENERIC_DB_ERROR));
}

#[tokio::test]
async fn other_handlers_surface_store_errors_unless_redacted() {
    let mut h = Harness::failing(ServiceOptions::default());
    let p1 = h.directory.connect("license:p1", "555-0101");
    let (resp, _) = h
        .call::<Vec<ChannelMessage>>(
            p1,
            DarkchatRequest::GetChannelMessages(ChannelIdRequest { channel_id: 1 }),
        )
        .await;
    assert_eq!(resp, ServiceResponse::error("database is locked"));

    let mut h = Harness::failing(ServiceOptions {
        redact_errors: true,
    });
    let p1 = h.directory.connect("license:p1", "555-0101");
    let (resp, _) = h
        .call::<Vec<ChannelMessage>>(
            p1,
            DarkchatRequest::GetChannelMessages(ChannelIdRequest { channel_id: 1 }),
        )
        .await;
    assert_eq!(resp, ServiceResponse::error(GENERIC_DB_ERROR));
}

#[tokio::test]
async fn unknown_connection_gets_an_error() {
    let mut h = Harness::new();
    let stranger = ConnectionId::new();

    let (resp, broadcasts) = h
        .call::<ChannelItem>(
            stranger,
            DarkchatRequest::JoinChannel(JoinChannelRequest {
                channel_identifier: "alpha".into(),
            }),
        )
        .await;
    assert!(!resp.is_ok());
    assert!(broadcasts.is_empty());
    assert!(!h.db.channel_exists("alpha").unwrap());
}
