//! Caching strategy injected into the engine.
//!
//! [`LocalStore`] persists everything; [`NoCache`] keeps nothing, so every
//! read goes to the remote.

use async_trait::async_trait;
use uuid::Uuid;

use crypter_shared::{Conversation, Message, Participant, ReadReceipt};
use crypter_store::documents::read_patch;
use crypter_store::{Collection, LocalStore, Query};

use crate::error::Result;
use crate::reconcile::{merge_fields, merge_for, CascadePlan};

#[async_trait]
pub trait Cache: Send + Sync {
    /// `false` for strategies that drop every write.
    fn is_persistent(&self) -> bool {
        true
    }

    async fn user(&self, id: Uuid) -> Result<Option<Participant>>;

    async fn conference(&self, id: Uuid) -> Result<Option<Conversation>>;

    async fn conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>>;

    async fn conferences(&self, query: Query) -> Result<Vec<Conversation>>;

    async fn messages(&self, query: Query) -> Result<Vec<Message>>;

    /// Write every stage of `plan`, one transaction per collection.
    async fn apply(&self, plan: CascadePlan) -> Result<()>;

    /// Merge a read receipt into its message. `None` when the message is
    /// not stored.
    async fn mark_read(&self, receipt: ReadReceipt) -> Result<Option<Message>>;

    async fn destroy(&self) -> Result<()>;
}

#[async_trait]
impl Cache for LocalStore {
    async fn user(&self, id: Uuid) -> Result<Option<Participant>> {
        Ok(LocalStore::user(self, id).await?)
    }

    async fn conference(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(LocalStore::conference(self, id).await?)
    }

    async fn conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>> {
        Ok(LocalStore::conference_by_participant(self, participant).await?)
    }

    async fn conferences(&self, query: Query) -> Result<Vec<Conversation>> {
        Ok(LocalStore::conferences(self, query).await?)
    }

    async fn messages(&self, query: Query) -> Result<Vec<Message>> {
        Ok(LocalStore::messages(self, query).await?)
    }

    async fn apply(&self, plan: CascadePlan) -> Result<()> {
        for (collection, documents) in plan.stages() {
            if documents.is_empty() {
                continue;
            }
            let count = documents.len();
            self.bulk_upsert(collection, documents, merge_for(collection))
                .await?;
            tracing::trace!(collection = collection.name(), count, "cascade stage written");
        }
        Ok(())
    }

    async fn mark_read(&self, receipt: ReadReceipt) -> Result<Option<Message>> {
        let patch = read_patch(&receipt)?;
        let message = self
            .with_db(move |db| {
                if db.get(Collection::Messages, receipt.uuid)?.is_none() {
                    return Ok(None);
                }
                db.upsert(Collection::Messages, receipt.uuid, |stored| {
                    merge_fields(stored, patch)
                })?;
                db.get_message(receipt.uuid)
            })
            .await?;
        Ok(message)
    }

    async fn destroy(&self) -> Result<()> {
        Ok(LocalStore::destroy(self).await?)
    }
}

/// Strategy that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn user(&self, _id: Uuid) -> Result<Option<Participant>> {
        Ok(None)
    }

    async fn conference(&self, _id: Uuid) -> Result<Option<Conversation>> {
        Ok(None)
    }

    async fn conference_by_participant(&self, _participant: Uuid) -> Result<Option<Conversation>> {
        Ok(None)
    }

    async fn conferences(&self, _query: Query) -> Result<Vec<Conversation>> {
        Ok(Vec::new())
    }

    async fn messages(&self, _query: Query) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn apply(&self, _plan: CascadePlan) -> Result<()> {
        Ok(())
    }

    async fn mark_read(&self, _receipt: ReadReceipt) -> Result<Option<Message>> {
        Ok(None)
    }

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crypter_store::Filter;

    fn message(date: i64) -> Message {
        Message {
            uuid: Uuid::new_v4(),
            conference: Conversation::new(Uuid::new_v4(), date),
            author: Participant::new(Uuid::new_v4()),
            date,
            content: "hi".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn apply_writes_message_with_references() {
        let store = LocalStore::in_memory().unwrap();
        let m = message(10);

        Cache::apply(&store, CascadePlan::for_messages(&[m.clone()]).unwrap())
            .await
            .unwrap();

        let stored = Cache::messages(
            &store,
            Query::new().filter(Filter::Conference(m.conference.uuid)),
        )
        .await
        .unwrap();
        assert_eq!(stored, vec![m.clone()]);
        assert!(Cache::user(&store, m.author.uuid).await.unwrap().is_some());
        assert!(Cache::conference(&store, m.conference.uuid)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn mark_read_merges_receipt() {
        let store = LocalStore::in_memory().unwrap();
        let m = message(10);
        Cache::apply(&store, CascadePlan::for_messages(&[m.clone()]).unwrap())
            .await
            .unwrap();

        let updated = Cache::mark_read(
            &store,
            ReadReceipt {
                uuid: m.uuid,
                read: true,
                read_at: Some(42),
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert!(updated.read);
        assert_eq!(updated.read_at, Some(42));
        assert_eq!(updated.content, "hi");
    }

    #[tokio::test]
    async fn mark_read_of_unknown_message_writes_nothing() {
        let store = LocalStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        let result = Cache::mark_read(
            &store,
            ReadReceipt {
                uuid: id,
                read: true,
                read_at: None,
            },
        )
        .await
        .unwrap();

        assert!(result.is_none());
        assert!(store.get(Collection::Messages, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_cache_forgets_everything() {
        let cache = NoCache;
        let m = message(1);
        cache
            .apply(CascadePlan::for_messages(&[m.clone()]).unwrap())
            .await
            .unwrap();
        assert!(cache.messages(Query::new()).await.unwrap().is_empty());
        assert!(!cache.is_persistent());
    }
}
