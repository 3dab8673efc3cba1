//! Scripted collaborators and fixtures for the engine tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crypter_shared::{
    Conversation, ConversationType, CryptoError, Crypter, Message, Participant, SyncPayload,
};
use crypter_store::LocalStore;

use crate::cache::Cache;
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::events::EventEmitter;
use crate::gateway::{Cursor, Direction, RemoteGateway, Scope};
use crate::reconcile::CascadePlan;

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    User(Uuid),
    Conferences(Cursor),
    ConferenceByParticipant(Uuid),
    Messages(Scope, Cursor),
    Synchronize { min_timestamp: i64, max_timestamp: i64 },
}

#[derive(Default)]
struct Server {
    users: Vec<Participant>,
    conferences: Vec<Conversation>,
    messages: Vec<Message>,
    payload: SyncPayload,
    failure: Option<u16>,
    requests: Vec<Request>,
}

/// In-memory server that answers like the REST API and logs every request.
#[derive(Default)]
pub struct FakeGateway {
    server: Mutex<Server>,
}

impl FakeGateway {
    pub fn add_users(&self, users: Vec<Participant>) {
        self.server.lock().unwrap().users.extend(users);
    }

    pub fn add_conferences(&self, conferences: Vec<Conversation>) {
        self.server.lock().unwrap().conferences.extend(conferences);
    }

    pub fn add_messages(&self, messages: Vec<Message>) {
        self.server.lock().unwrap().messages.extend(messages);
    }

    pub fn set_payload(&self, payload: SyncPayload) {
        self.server.lock().unwrap().payload = payload;
    }

    /// Answer every request with this HTTP status until reset with `None`.
    pub fn fail_with(&self, status: Option<u16>) {
        self.server.lock().unwrap().failure = status;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.server.lock().unwrap().requests.clone()
    }

    fn record(&self, request: Request) -> Result<std::sync::MutexGuard<'_, Server>> {
        let mut server = self.server.lock().unwrap();
        server.requests.push(request);
        match server.failure {
            Some(status) => Err(SyncError::Http { status }),
            None => Ok(server),
        }
    }
}

fn in_scope(message: &Message, scope: Scope) -> bool {
    match scope {
        Scope::Conference(id) => message.conference.uuid == id,
        Scope::Participant(id) => message
            .conference
            .participant
            .as_ref()
            .is_some_and(|p| p.uuid == id),
    }
}

fn page<T: Clone>(
    records: &[T],
    cursor: Cursor,
    time: impl Fn(&T) -> i64,
    unread: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut selected: Vec<T> = records
        .iter()
        .filter(|r| match cursor.direction {
            Direction::Old => time(r) < cursor.timestamp,
            Direction::New => time(r) > cursor.timestamp,
            Direction::Unread => unread(r) && time(r) > cursor.timestamp,
        })
        .cloned()
        .collect();

    match cursor.direction {
        Direction::Old => {
            selected.sort_by_key(|r| std::cmp::Reverse(time(r)));
            selected.truncate(cursor.limit);
        }
        Direction::New => {
            selected.sort_by_key(|r| time(r));
            selected.truncate(cursor.limit);
        }
        Direction::Unread => selected.sort_by_key(|r| time(r)),
    }
    selected
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn user(&self, id: Uuid) -> Result<Option<Participant>> {
        let server = self.record(Request::User(id))?;
        Ok(server.users.iter().find(|u| u.uuid == id).cloned())
    }

    async fn conferences(&self, cursor: Cursor) -> Result<Vec<Conversation>> {
        let server = self.record(Request::Conferences(cursor))?;
        Ok(page(
            &server.conferences,
            cursor,
            |c| c.updated_at,
            |c| c.unread_count() > 0,
        ))
    }

    async fn conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>> {
        let server = self.record(Request::ConferenceByParticipant(participant))?;
        Ok(server
            .conferences
            .iter()
            .find(|c| c.participant.as_ref().is_some_and(|p| p.uuid == participant))
            .cloned())
    }

    async fn messages(&self, scope: Scope, cursor: Cursor) -> Result<Vec<Message>> {
        let server = self.record(Request::Messages(scope, cursor))?;
        let scoped: Vec<Message> = server
            .messages
            .iter()
            .filter(|m| in_scope(m, scope))
            .cloned()
            .collect();
        Ok(page(&scoped, cursor, |m| m.date, |m| !m.read))
    }

    async fn synchronize(&self, min_timestamp: i64, max_timestamp: i64) -> Result<SyncPayload> {
        let server = self.record(Request::Synchronize {
            min_timestamp,
            max_timestamp,
        })?;
        Ok(server.payload.clone())
    }
}

/// Answers from `inner`, then fires `cancel`: the caller is torn down after
/// the page arrived but before anything was written.
pub struct CancelOnAnswer {
    pub inner: Arc<FakeGateway>,
    pub cancel: CancellationToken,
}

#[async_trait]
impl RemoteGateway for CancelOnAnswer {
    async fn user(&self, id: Uuid) -> Result<Option<Participant>> {
        let answer = self.inner.user(id).await;
        self.cancel.cancel();
        answer
    }

    async fn conferences(&self, cursor: Cursor) -> Result<Vec<Conversation>> {
        let answer = self.inner.conferences(cursor).await;
        self.cancel.cancel();
        answer
    }

    async fn conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>> {
        let answer = self.inner.conference_by_participant(participant).await;
        self.cancel.cancel();
        answer
    }

    async fn messages(&self, scope: Scope, cursor: Cursor) -> Result<Vec<Message>> {
        let answer = self.inner.messages(scope, cursor).await;
        self.cancel.cancel();
        answer
    }

    async fn synchronize(&self, min_timestamp: i64, max_timestamp: i64) -> Result<SyncPayload> {
        let answer = self.inner.synchronize(min_timestamp, max_timestamp).await;
        self.cancel.cancel();
        answer
    }
}

// ---------------------------------------------------------------------------
// Crypter
// ---------------------------------------------------------------------------

/// Marks ciphertext with an `enc:` prefix and records recipients.
#[derive(Default)]
pub struct PlainCrypter {
    recipients: Mutex<Vec<Vec<String>>>,
}

impl PlainCrypter {
    pub fn recipients(&self) -> Vec<Vec<String>> {
        self.recipients.lock().unwrap().clone()
    }
}

#[async_trait]
impl Crypter for PlainCrypter {
    async fn encrypt(
        &self,
        plaintext: &str,
        public_keys: &[String],
    ) -> std::result::Result<String, CryptoError> {
        if public_keys.is_empty() {
            return Err(CryptoError::NoRecipients);
        }
        self.recipients.lock().unwrap().push(public_keys.to_vec());
        Ok(format!("enc:{plaintext}"))
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        _private_key: &str,
    ) -> std::result::Result<String, CryptoError> {
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_owned)
            .ok_or(CryptoError::DecryptionFailed)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

pub struct RecordingEmitter {
    responder: Responder,
    emitted: Mutex<Vec<(String, Value)>>,
}

impl RecordingEmitter {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            emitted: Mutex::new(Vec::new()),
        }
    }

    /// Acknowledges `private.message.send` with the stored message.
    pub fn echoing_sends() -> Self {
        Self::new(|event, data| {
            (event == crypter_shared::protocol::EMIT_SEND_MESSAGE).then(|| {
                json!({
                    "uuid": Uuid::new_v4(),
                    "conference": { "uuid": data["conference"] },
                    "author": { "uuid": me().uuid },
                    "type": data["type"],
                    "date": 1_000,
                    "content": data["content"],
                })
            })
        })
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    async fn emit(&self, event: &str, data: Value) -> Result<Option<Value>> {
        let ack = (self.responder)(event, &data);
        self.emitted.lock().unwrap().push((event.to_string(), data));
        Ok(ack)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const ME: Uuid = Uuid::from_u128(0x6d65);

pub fn me() -> Participant {
    Participant {
        name: Some("me".into()),
        public_key: Some("pk-me".into()),
        private_key: Some("sk-me".into()),
        ..Participant::new(ME)
    }
}

pub fn peer(name: &str) -> Participant {
    Participant {
        name: Some(name.into()),
        public_key: Some(format!("pk-{name}")),
        ..Participant::new(Uuid::new_v4())
    }
}

pub fn conversation_with(participant: &Participant, updated_at: i64) -> Conversation {
    Conversation {
        kind: Some(ConversationType::Private),
        participant: Some(participant.clone()),
        ..Conversation::new(Uuid::new_v4(), updated_at)
    }
}

/// A message as the server sends it: content still encrypted.
pub fn wire_message(
    conversation: &Conversation,
    author: &Participant,
    date: i64,
    read: bool,
) -> Message {
    Message {
        content: format!("enc:msg {date}"),
        ..plain_message(conversation, author, date, read)
    }
}

/// A message as the cache holds it.
pub fn plain_message(
    conversation: &Conversation,
    author: &Participant,
    date: i64,
    read: bool,
) -> Message {
    Message {
        uuid: Uuid::new_v4(),
        conference: conversation.clone(),
        author: author.clone(),
        read,
        kind: "text/plain".into(),
        date,
        content: format!("msg {date}"),
        ..Default::default()
    }
}

pub async fn seed(store: &LocalStore, messages: &[Message]) {
    Cache::apply(store, CascadePlan::for_messages(messages).unwrap())
        .await
        .unwrap();
}

pub async fn store_conversation(store: &LocalStore, conversation: &Conversation) {
    Cache::apply(
        store,
        CascadePlan::for_conversations(std::slice::from_ref(conversation)).unwrap(),
    )
    .await
    .unwrap();
}

pub fn engine_over(gateway: &Arc<FakeGateway>, store: &LocalStore) -> SyncEngine {
    SyncEngine::builder(gateway.clone(), Arc::new(PlainCrypter::default()), me())
        .cache(Arc::new(store.clone()))
        .build()
}
