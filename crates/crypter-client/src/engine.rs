//! The sync engine: every read and write the UI performs goes through here.
//!
//! Reads consult the cache first once the client is synchronized and only
//! ask the remote for what the local page lacks. Remote records are
//! decrypted, handed back to the caller and written to the cache on a
//! detached task; callers never wait for those writes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crypter_shared::constants::{
    CHANGE_CHANNEL_CAPACITY, DEFAULT_BATCH_SIZE, DEFAULT_CONTENT_TYPE,
    DEFAULT_PENDING_READ_TTL_SECS,
};
use crypter_shared::protocol::{
    SendMessageRequest, EMIT_READ_MESSAGE, EMIT_SEND_MESSAGE, EMIT_WRITE_TO_USER,
};
use crypter_shared::types::now;
use crypter_shared::{Conversation, Crypter, Message, Participant, ReadReceipt};
use crypter_store::{Database, Filter, LocalStore, Order, Query};

use crate::cache::{Cache, NoCache};
use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::events::EventEmitter;
use crate::gateway::{Cursor, Direction, HttpGateway, RemoteGateway, Scope};
use crate::reconcile::{
    clamp_conversations, clamp_messages, conversation_continuation, dedup_merge,
    message_continuation, sort_conversations, sort_messages, CascadePlan,
};
use crate::state::SyncState;

/// Published after every successful cache write.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    User(Participant),
    Conversation(Conversation),
    Message(Message),
    /// Transient; never stored.
    Typing(Participant),
}

/// Records headed for the cache.
#[derive(Debug, Clone)]
pub(crate) enum Ingest {
    Users(Vec<Participant>),
    Conversations(Vec<Conversation>),
    Messages(Vec<Message>),
}

impl Ingest {
    fn plan(&self) -> Result<CascadePlan> {
        let plan = match self {
            Self::Users(users) => CascadePlan::for_users(users)?,
            Self::Conversations(conversations) => CascadePlan::for_conversations(conversations)?,
            Self::Messages(messages) => CascadePlan::for_messages(messages)?,
        };
        Ok(plan)
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Users(v) => v.len(),
            Self::Conversations(v) => v.len(),
            Self::Messages(v) => v.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local-first facade over the cache, the remote API and the crypter.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) gateway: Arc<dyn RemoteGateway>,
    pub(crate) crypter: Arc<dyn Crypter>,
    pub(crate) emitter: Option<Arc<dyn EventEmitter>>,
    pub(crate) state: Arc<SyncState>,
    pub(crate) user: Arc<Participant>,
    pub(crate) batch_size: usize,
    pub(crate) changes: broadcast::Sender<StoreChange>,
    pub(crate) background: TaskTracker,
    pub(crate) sync_lock: Arc<tokio::sync::Mutex<()>>,
}

pub struct SyncEngineBuilder {
    gateway: Arc<dyn RemoteGateway>,
    crypter: Arc<dyn Crypter>,
    user: Participant,
    cache: Option<Arc<dyn Cache>>,
    emitter: Option<Arc<dyn EventEmitter>>,
    batch_size: usize,
    pending_read_ttl: Duration,
}

impl SyncEngineBuilder {
    /// Caching strategy. Without one nothing is cached.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pending_read_ttl(mut self, ttl: Duration) -> Self {
        self.pending_read_ttl = ttl;
        self
    }

    pub fn config(self, config: &ClientConfig) -> Self {
        self.batch_size(config.batch_size)
            .pending_read_ttl(config.pending_read_ttl)
    }

    pub fn build(self) -> SyncEngine {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        SyncEngine {
            cache: self.cache.unwrap_or_else(|| Arc::new(NoCache)),
            gateway: self.gateway,
            crypter: self.crypter,
            emitter: self.emitter,
            state: Arc::new(SyncState::new(self.pending_read_ttl)),
            user: Arc::new(self.user),
            batch_size: self.batch_size,
            changes,
            background: TaskTracker::new(),
            sync_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Race `fut` against `cancel`.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = fut => result,
    }
}

pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

fn scope_filter(scope: Scope) -> Filter {
    match scope {
        Scope::Conference(id) => Filter::Conference(id),
        Scope::Participant(id) => Filter::Participant(id),
    }
}

fn message_query(scope: Scope, cursor: Cursor) -> Query {
    let query = Query::new().filter(scope_filter(scope));
    match cursor.direction {
        Direction::Old => query
            .filter(Filter::Before(cursor.timestamp))
            .order(Order::Desc)
            .limit(cursor.limit),
        Direction::New => query
            .filter(Filter::After(cursor.timestamp))
            .order(Order::Asc)
            .limit(cursor.limit),
        Direction::Unread => query
            .filter(Filter::Read(false))
            .filter(Filter::After(cursor.timestamp))
            .order(Order::Asc),
    }
}

/// `None` when the cache cannot answer the cursor at all.
fn conversation_query(cursor: Cursor) -> Option<Query> {
    match cursor.direction {
        Direction::Old => Some(
            Query::new()
                .filter(Filter::Before(cursor.timestamp))
                .order(Order::Desc)
                .limit(cursor.limit),
        ),
        Direction::New => Some(
            Query::new()
                .filter(Filter::After(cursor.timestamp))
                .order(Order::Asc)
                .limit(cursor.limit),
        ),
        Direction::Unread => None,
    }
}

impl SyncEngine {
    pub fn builder(
        gateway: Arc<dyn RemoteGateway>,
        crypter: Arc<dyn Crypter>,
        user: Participant,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            gateway,
            crypter,
            user,
            cache: None,
            emitter: None,
            batch_size: DEFAULT_BATCH_SIZE,
            pending_read_ttl: Duration::from_secs(DEFAULT_PENDING_READ_TTL_SECS),
        }
    }

    /// Engine over the REST API and an on-disk store, as configured.
    pub fn from_config(
        config: &ClientConfig,
        user: Participant,
        crypter: Arc<dyn Crypter>,
    ) -> Result<SyncEngineBuilder> {
        let path = match &config.db_path {
            Some(path) => path.clone(),
            None => Database::default_path()?,
        };
        let store = LocalStore::open(&path)?;
        let gateway = HttpGateway::new(config)?;

        Ok(Self::builder(Arc::new(gateway), crypter, user)
            .cache(Arc::new(store))
            .config(config))
    }

    pub fn user(&self) -> &Participant {
        &self.user
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_synchronized(&self) -> bool {
        self.state.is_synchronized()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Wait for every detached cache write scheduled so far.
    pub async fn flush(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Drop every cached record and start over unsynchronized.
    pub async fn destroy(&self) -> Result<()> {
        self.flush().await;
        self.cache.destroy().await?;
        self.state.mark_desynchronized();
        info!("local cache destroyed");
        Ok(())
    }

    /// Pick the unread direction when the backlog exceeds one page.
    pub fn catch_up_cursor(&self, conversation: &Conversation, timestamp: i64) -> Cursor {
        if conversation.unread_count() as usize > self.batch_size {
            Cursor::unread(timestamp, self.batch_size)
        } else {
            Cursor::new(timestamp, self.batch_size)
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Look a user up locally, then remotely.
    pub async fn find_user(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<Participant>> {
        ensure_live(cancel)?;
        if let Some(user) = self.cache.user(id).await? {
            return Ok(Some(user));
        }

        let remote = match until_cancelled(cancel, self.gateway.user(id)).await {
            Ok(user) => user,
            Err(e) if e.is_timeout() => {
                warn!(user = %id, error = %e, "user lookup timed out");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(user) = &remote {
            self.persist_detached(Ingest::Users(vec![user.clone()]), cancel);
        }
        Ok(remote)
    }

    /// The conversation held with `participant`, locally or remotely.
    pub async fn conversation_by_participant(
        &self,
        participant: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<Conversation>> {
        ensure_live(cancel)?;
        if let Some(conversation) = self.cache.conference_by_participant(participant).await? {
            return Ok(Some(conversation));
        }

        let remote = until_cancelled(cancel, self.gateway.conference_by_participant(participant));
        match remote.await {
            Ok(Some(conversation)) => {
                let conversation = self.decrypt_preview(conversation).await?;
                self.persist_detached(Ingest::Conversations(vec![conversation.clone()]), cancel);
                Ok(Some(conversation))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_timeout() => {
                warn!(participant = %participant, error = %e, "conversation lookup timed out");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// One page of conversations, most recently updated first.
    pub async fn conversations(
        &self,
        cursor: Cursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<Conversation>> {
        ensure_live(cancel)?;
        if cursor.limit == 0 {
            return Ok(Vec::new());
        }

        let mut local = match conversation_query(cursor) {
            Some(query) => self.cache.conferences(query).await?,
            None => Vec::new(),
        };
        sort_conversations(&mut local);

        let synchronized = self.state.is_synchronized();
        if synchronized && local.len() >= cursor.limit {
            debug!(count = local.len(), "conversation page served locally");
            return Ok(local);
        }

        let request = if synchronized {
            conversation_continuation(&local, cursor)
        } else {
            cursor
        };
        debug!(?request, local = local.len(), "fetching conversations remotely");

        let remote = match until_cancelled(cancel, self.gateway.conferences(request)).await {
            Ok(remote) => remote,
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "conversation page timed out, serving cache");
                return Ok(local);
            }
            Err(e) => return Err(e),
        };
        let remote = self.decrypt_previews(remote).await?;
        self.persist_detached(Ingest::Conversations(remote.clone()), cancel);

        let base = if synchronized { local } else { Vec::new() };
        let mut page = dedup_merge(base, remote);
        sort_conversations(&mut page);
        Ok(clamp_conversations(page, cursor.direction, cursor.limit))
    }

    /// One page of messages, oldest first.
    pub async fn messages(
        &self,
        scope: Scope,
        cursor: Cursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        ensure_live(cancel)?;
        if cursor.limit == 0 && cursor.direction != Direction::Unread {
            return Ok(Vec::new());
        }

        let mut local = self.cache.messages(message_query(scope, cursor)).await?;
        sort_messages(&mut local);

        let synchronized = self.state.is_synchronized();
        if synchronized && self.local_page_complete(scope, cursor, &local).await? {
            debug!(?scope, count = local.len(), "message page served locally");
            return Ok(local);
        }

        let request = if synchronized {
            message_continuation(&local, cursor)
        } else {
            cursor
        };
        debug!(?scope, ?request, local = local.len(), "fetching messages remotely");

        let remote = match until_cancelled(cancel, self.gateway.messages(scope, request)).await {
            Ok(remote) => remote,
            Err(e) if e.is_timeout() => {
                warn!(?scope, error = %e, "message page timed out, serving cache");
                return Ok(local);
            }
            Err(e) => return Err(e),
        };
        let remote = self.decrypt_messages(remote).await?;
        self.persist_detached(Ingest::Messages(remote.clone()), cancel);

        let base = if synchronized { local } else { Vec::new() };
        let mut page = dedup_merge(base, remote);
        sort_messages(&mut page);
        Ok(clamp_messages(page, cursor.direction, cursor.limit))
    }

    async fn local_page_complete(
        &self,
        scope: Scope,
        cursor: Cursor,
        local: &[Message],
    ) -> Result<bool> {
        if cursor.direction != Direction::Unread {
            return Ok(local.len() >= cursor.limit);
        }

        let conversation = match scope {
            Scope::Conference(id) => self.cache.conference(id).await?,
            Scope::Participant(id) => self.cache.conference_by_participant(id).await?,
        };
        Ok(conversation
            .map(|c| local.len() >= c.unread_count() as usize)
            .unwrap_or(false))
    }

    // ------------------------------------------------------------------
    // Client actions
    // ------------------------------------------------------------------

    fn emitter(&self) -> Result<&Arc<dyn EventEmitter>> {
        self.emitter.as_ref().ok_or(SyncError::Disconnected)
    }

    /// Encrypt `plaintext` for the participant and ourselves, send it and
    /// cache the acknowledged message.
    pub async fn send(&self, conversation: &Conversation, plaintext: &str) -> Result<Message> {
        let emitter = self.emitter()?;

        let mut keys = Vec::with_capacity(2);
        if let Some(participant) = &conversation.participant {
            let key = match &participant.public_key {
                Some(key) => Some(key.clone()),
                None => self
                    .find_user(participant.uuid, &CancellationToken::new())
                    .await?
                    .and_then(|p| p.public_key),
            };
            keys.extend(key);
        }
        keys.extend(self.user.public_key.clone());

        let request = SendMessageRequest {
            conference: conversation.uuid,
            kind: DEFAULT_CONTENT_TYPE.to_string(),
            content: self.crypter.encrypt(plaintext, &keys).await?,
        };
        let ack = emitter
            .emit(EMIT_SEND_MESSAGE, serde_json::to_value(&request)?)
            .await?
            .ok_or_else(|| SyncError::Rejected {
                event: EMIT_SEND_MESSAGE.to_string(),
            })?;

        let mut message: Message = serde_json::from_value(ack)?;
        message.content = plaintext.to_string();
        let message = self.decrypt_embedded_preview(message).await?;
        self.ingest(Ingest::Messages(vec![message.clone()])).await?;
        debug!(message = %message.uuid, conference = %conversation.uuid, "message sent");
        Ok(message)
    }

    /// Tell the server `message` was read and record the receipt.
    pub async fn mark_read(&self, message: &Message) -> Result<Option<Message>> {
        let emitter = self.emitter()?;
        let ack = emitter
            .emit(EMIT_READ_MESSAGE, json!({ "uuid": message.uuid }))
            .await?;

        let receipt = match ack {
            Some(value) => serde_json::from_value(value)?,
            None => ReadReceipt {
                uuid: message.uuid,
                read: true,
                read_at: Some(now()),
            },
        };
        self.apply_receipt(receipt).await
    }

    pub async fn notify_typing(&self, participant: Uuid) -> Result<()> {
        self.emitter()?
            .emit(EMIT_WRITE_TO_USER, json!({ "user": participant }))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Decryption
    // ------------------------------------------------------------------

    fn private_key(&self) -> Result<&str> {
        self.user
            .private_key
            .as_deref()
            .ok_or(SyncError::MissingPrivateKey)
    }

    pub(crate) async fn decrypt_preview(
        &self,
        mut conversation: Conversation,
    ) -> Result<Conversation> {
        if conversation.has_encrypted_preview() {
            let key = self.private_key()?;
            if let Some(last) = conversation.last_message.as_mut() {
                last.content = self.crypter.decrypt(&last.content, key).await?;
            }
        }
        Ok(conversation)
    }

    pub(crate) async fn decrypt_previews(
        &self,
        conversations: Vec<Conversation>,
    ) -> Result<Vec<Conversation>> {
        try_join_all(conversations.into_iter().map(|c| self.decrypt_preview(c))).await
    }

    async fn decrypt_embedded_preview(&self, mut message: Message) -> Result<Message> {
        let conference = std::mem::take(&mut message.conference);
        message.conference = self.decrypt_preview(conference).await?;
        Ok(message)
    }

    pub(crate) async fn decrypt_message(&self, mut message: Message) -> Result<Message> {
        let key = self.private_key()?;
        message.content = self.crypter.decrypt(&message.content, key).await?;
        self.decrypt_embedded_preview(message).await
    }

    /// Decrypt a batch, keeping its order.
    pub(crate) async fn decrypt_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        try_join_all(messages.into_iter().map(|m| self.decrypt_message(m))).await
    }

    // ------------------------------------------------------------------
    // Cache writes
    // ------------------------------------------------------------------

    pub(crate) fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Write `batch` with its references, re-apply waiting read receipts and
    /// publish the changes.
    pub(crate) async fn ingest(&self, batch: Ingest) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.cache.apply(batch.plan()?).await?;

        match batch {
            Ingest::Users(users) => {
                for user in users {
                    self.notify(StoreChange::User(user));
                }
            }
            Ingest::Conversations(conversations) => {
                for conversation in conversations {
                    self.notify(StoreChange::Conversation(conversation));
                }
            }
            Ingest::Messages(messages) => {
                let ids: Vec<Uuid> = messages.iter().map(|m| m.uuid).collect();
                for message in messages {
                    self.notify(StoreChange::Message(message));
                }
                self.apply_pending(ids).await;
            }
        }
        Ok(())
    }

    /// Schedule `batch` for writing unless `cancel` already fired.
    pub(crate) fn persist_detached(&self, batch: Ingest, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            debug!(count = batch.len(), "cancelled, dropping cache write");
            return;
        }
        let engine = self.clone();
        self.background.spawn(async move {
            let count = batch.len();
            if let Err(e) = engine.ingest(batch).await {
                warn!(count, error = %e, "background cache write failed");
            }
        });
    }

    async fn apply_pending(&self, ids: Vec<Uuid>) {
        for receipt in self.state.take_pending(ids) {
            match self.cache.mark_read(receipt).await {
                Ok(Some(message)) => {
                    debug!(message = %receipt.uuid, "applied deferred read receipt");
                    self.notify(StoreChange::Message(message));
                }
                Ok(None) => self.state.defer_read(receipt),
                Err(e) => {
                    warn!(message = %receipt.uuid, error = %e, "deferred read receipt failed")
                }
            }
        }
    }

    /// Merge a read receipt into its cached message. A receipt for a
    /// message not yet cached is kept and retried on the next ingestion.
    pub async fn apply_receipt(&self, receipt: ReadReceipt) -> Result<Option<Message>> {
        match self.cache.mark_read(receipt).await? {
            Some(message) => {
                self.notify(StoreChange::Message(message.clone()));
                Ok(Some(message))
            }
            None if self.cache.is_persistent() => {
                self.state.defer_read(receipt);
                Err(SyncError::ReferentialGap(receipt.uuid))
            }
            None => Ok(None),
        }
    }
}
