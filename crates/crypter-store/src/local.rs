//! Async handle over [`Database`].
//!
//! SQLite calls block, so every operation runs on tokio's blocking pool
//! behind a mutex. Each call is one suspension point for the caller and is
//! atomic per document; nothing spans collections.

use std::path::Path;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crypter_shared::{Conversation, Message, Participant};

use crate::collection::{Collection, Document, Query};
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Cloneable, thread-safe async access to the local store.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the store at `path`, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        tracing::info!(path = %path.display(), "opening local store");
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }

    // ------------------------------------------------------------------
    // Raw documents
    // ------------------------------------------------------------------

    pub async fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>> {
        self.with_db(move |db| db.get(collection, id)).await
    }

    pub async fn find(&self, collection: Collection, query: Query) -> Result<Vec<Document>> {
        self.with_db(move |db| db.find(collection, &query)).await
    }

    pub async fn upsert<F>(&self, collection: Collection, id: Uuid, merge: F) -> Result<Document>
    where
        F: FnOnce(Document) -> Document + Send + 'static,
    {
        self.with_db(move |db| db.upsert(collection, id, merge)).await
    }

    pub async fn bulk_upsert<F>(
        &self,
        collection: Collection,
        documents: Vec<Document>,
        merge: F,
    ) -> Result<Vec<Document>>
    where
        F: Fn(Document, Document) -> Document + Send + 'static,
    {
        self.with_db(move |db| db.bulk_upsert(collection, documents, merge))
            .await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.with_db(|db| db.destroy()).await
    }

    // ------------------------------------------------------------------
    // Hydrated records
    // ------------------------------------------------------------------

    pub async fn user(&self, id: Uuid) -> Result<Option<Participant>> {
        self.with_db(move |db| db.get_user(id)).await
    }

    pub async fn conference(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_db(move |db| db.get_conference(id)).await
    }

    pub async fn conference_by_participant(
        &self,
        participant: Uuid,
    ) -> Result<Option<Conversation>> {
        self.with_db(move |db| db.get_conference_by_participant(participant))
            .await
    }

    pub async fn conferences(&self, query: Query) -> Result<Vec<Conversation>> {
        self.with_db(move |db| db.find_conferences(&query)).await
    }

    pub async fn message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_db(move |db| db.get_message(id)).await
    }

    pub async fn messages(&self, query: Query) -> Result<Vec<Message>> {
        self.with_db(move |db| db.find_messages(&query)).await
    }
}
