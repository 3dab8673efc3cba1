//! Live event stream.
//!
//! The socket layer decodes server pushes into [`LiveEvent`]s and feeds them
//! through an mpsc channel to [`run_event_loop`], which applies them to the
//! cache one at a time. Client requests go the other way through an
//! [`EventEmitter`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crypter_shared::protocol::{
    ReadReceipt, EVENT_CONFERENCE_UPDATED, EVENT_CONNECT, EVENT_DISCONNECT,
    EVENT_MESSAGES_READ_SINCE, EVENT_MESSAGE_READ, EVENT_MESSAGE_SENT, EVENT_USER_UPDATED,
    EVENT_WROTE_TO_USER,
};
use crypter_shared::{Conversation, Message, Participant};

use crate::engine::{Ingest, StoreChange, SyncEngine};
use crate::error::{Result, SyncError};

/// Request/acknowledge channel to the server.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Send `event` and wait for the acknowledgement payload, if any.
    async fn emit(&self, event: &str, data: Value) -> Result<Option<Value>>;
}

/// A decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Connected,
    Disconnected,
    UserUpdated(Participant),
    ConversationUpdated(Conversation),
    MessageReceived(Message),
    MessageRead(ReadReceipt),
    MessagesReadSince(Vec<ReadReceipt>),
    Typing(Participant),
}

impl LiveEvent {
    /// Decode a named event. Unknown names yield `None`.
    pub fn parse(name: &str, payload: Value) -> Result<Option<Self>> {
        let event = match name {
            EVENT_CONNECT => Self::Connected,
            EVENT_DISCONNECT => Self::Disconnected,
            EVENT_USER_UPDATED => Self::UserUpdated(serde_json::from_value(payload)?),
            EVENT_CONFERENCE_UPDATED => Self::ConversationUpdated(serde_json::from_value(payload)?),
            EVENT_MESSAGE_SENT => Self::MessageReceived(serde_json::from_value(payload)?),
            EVENT_MESSAGE_READ => Self::MessageRead(serde_json::from_value(payload)?),
            EVENT_MESSAGES_READ_SINCE => Self::MessagesReadSince(serde_json::from_value(payload)?),
            EVENT_WROTE_TO_USER => Self::Typing(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl SyncEngine {
    /// Apply one live event to the cache.
    pub async fn handle_event(&self, event: LiveEvent) -> Result<()> {
        match event {
            LiveEvent::Connected => {
                if !self.is_synchronized() {
                    let report = self.synchronize(&CancellationToken::new()).await?;
                    debug!(?report, "synchronized after reconnect");
                }
            }
            LiveEvent::Disconnected => {
                if self.state.mark_desynchronized() {
                    info!("event stream disconnected, cache marked stale");
                }
            }
            LiveEvent::UserUpdated(user) => {
                self.ingest(Ingest::Users(vec![user])).await?;
            }
            LiveEvent::ConversationUpdated(conversation) => {
                let conversation = self.decrypt_preview(conversation).await?;
                self.ingest(Ingest::Conversations(vec![conversation])).await?;
            }
            LiveEvent::MessageReceived(message) => {
                let message = self.decrypt_message(message).await?;
                self.ingest(Ingest::Messages(vec![message])).await?;
            }
            LiveEvent::MessageRead(receipt) => {
                self.receive_receipt(receipt).await?;
            }
            LiveEvent::MessagesReadSince(receipts) => {
                for receipt in receipts {
                    self.receive_receipt(receipt).await?;
                }
            }
            LiveEvent::Typing(user) => self.notify(StoreChange::Typing(user)),
        }
        Ok(())
    }

    async fn receive_receipt(&self, receipt: ReadReceipt) -> Result<()> {
        match self.apply_receipt(receipt).await {
            Ok(_) => Ok(()),
            Err(SyncError::ReferentialGap(id)) => {
                debug!(message = %id, "read receipt deferred until its message arrives");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Apply events from `rx` in arrival order until the channel closes or
/// `shutdown` fires.
pub async fn run_event_loop(
    engine: SyncEngine,
    mut rx: mpsc::Receiver<LiveEvent>,
    shutdown: CancellationToken,
) {
    info!("live event loop started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if let Err(e) = engine.handle_event(event).await {
            warn!(error = %e, "failed to apply live event");
        }
    }

    engine.flush().await;
    info!("live event loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::testing::*;
    use crypter_shared::ConversationType;
    use crypter_store::{Filter, LocalStore, Query};

    #[test]
    fn parses_known_events() {
        let id = Uuid::new_v4();
        let event = LiveEvent::parse(EVENT_MESSAGE_READ, json!({ "uuid": id, "readAt": 5 }))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            LiveEvent::MessageRead(ReadReceipt {
                uuid: id,
                read: true,
                read_at: Some(5),
            })
        );

        assert_eq!(
            LiveEvent::parse(EVENT_DISCONNECT, Value::Null).unwrap(),
            Some(LiveEvent::Disconnected)
        );
        assert!(LiveEvent::parse("presence", Value::Null).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = LiveEvent::parse(EVENT_MESSAGE_SENT, json!({ "uuid": 3 })).unwrap_err();
        assert!(matches!(err, SyncError::Payload(_)));
    }

    #[tokio::test]
    async fn live_message_is_decrypted_and_cached() {
        let store = LocalStore::in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);
        let mut changes = engine.subscribe();
        let bob = peer("bob");
        let conversation = conversation_with(&bob, 10);
        let wire = wire_message(&conversation, &bob, 10, false);

        engine
            .handle_event(LiveEvent::MessageReceived(wire.clone()))
            .await
            .unwrap();

        let stored = store
            .messages(Query::new().filter(Filter::Conference(conversation.uuid)))
            .await
            .unwrap();
        assert_eq!(stored[0].content, "msg 10");
        assert!(matches!(changes.try_recv(), Ok(StoreChange::Message(m)) if m.uuid == wire.uuid));
    }

    #[tokio::test]
    async fn receipt_before_message_is_replayed() {
        let store = LocalStore::in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);
        let bob = peer("bob");
        let wire = wire_message(&conversation_with(&bob, 10), &bob, 10, false);

        engine
            .handle_event(LiveEvent::MessageRead(ReadReceipt {
                uuid: wire.uuid,
                read: true,
                read_at: Some(11),
            }))
            .await
            .unwrap();
        engine
            .handle_event(LiveEvent::MessageReceived(wire.clone()))
            .await
            .unwrap();

        let stored = store.messages(Query::new()).await.unwrap();
        assert!(stored[0].read);
        assert_eq!(stored[0].read_at, Some(11));
    }

    #[tokio::test]
    async fn batch_receipts_mark_every_message() {
        let store = LocalStore::in_memory().unwrap();
        let bob = peer("bob");
        let conversation = conversation_with(&bob, 10);
        let messages: Vec<_> = (1..=3)
            .map(|d| plain_message(&conversation, &bob, d, false))
            .collect();
        seed(&store, &messages).await;
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);

        let receipts = messages.iter().map(ReadReceipt::from).map(|mut r| {
            r.read = true;
            r.read_at = Some(20);
            r
        });
        engine
            .handle_event(LiveEvent::MessagesReadSince(receipts.collect()))
            .await
            .unwrap();

        let unread = store
            .messages(Query::new().filter(Filter::Read(false)))
            .await
            .unwrap();
        assert!(unread.is_empty());
    }

    #[tokio::test]
    async fn stale_conference_update_keeps_newer_counts() {
        let store = LocalStore::in_memory().unwrap();
        let bob = peer("bob");
        let mut current = conversation_with(&bob, 100);
        current.messages_count = Some(9);
        store_conversation(&store, &current).await;
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);

        let mut stale = current.clone();
        stale.updated_at = 50;
        stale.messages_count = Some(2);
        engine
            .handle_event(LiveEvent::ConversationUpdated(stale))
            .await
            .unwrap();

        let stored = store.conference(current.uuid).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, 100);
        assert_eq!(stored.messages_count, Some(9));
    }

    #[tokio::test]
    async fn partial_conference_update_keeps_known_fields() {
        let store = LocalStore::in_memory().unwrap();
        let bob = peer("bob");
        let mut current = conversation_with(&bob, 100);
        current.kind = Some(ConversationType::Public);
        current.messages_count = Some(9);
        current.unread_messages_count = Some(4);
        store_conversation(&store, &current).await;
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);

        let update = json!({ "uuid": current.uuid, "updated_at": 200 });
        let event = LiveEvent::parse(EVENT_CONFERENCE_UPDATED, update)
            .unwrap()
            .unwrap();
        engine.handle_event(event).await.unwrap();

        let stored = store.conference(current.uuid).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, 200);
        assert_eq!(stored.kind, Some(ConversationType::Public));
        assert_eq!(stored.messages_count, Some(9));
        assert_eq!(stored.unread_messages_count, Some(4));
        assert_eq!(stored.participant.map(|p| p.uuid), Some(bob.uuid));
    }

    #[tokio::test]
    async fn stored_unread_count_never_exceeds_total() {
        let store = LocalStore::in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);
        let id = Uuid::new_v4();

        let update = json!({
            "uuid": id,
            "updated_at": 10,
            "messages_count": 1,
            "unread_messages_count": 5
        });
        let event = LiveEvent::parse(EVENT_CONFERENCE_UPDATED, update)
            .unwrap()
            .unwrap();
        engine.handle_event(event).await.unwrap();

        let stored = store.conference(id).await.unwrap().unwrap();
        assert_eq!(stored.messages_count, Some(1));
        assert_eq!(stored.unread_messages_count, Some(1));
    }

    #[tokio::test]
    async fn loop_applies_events_in_order_and_stops_on_close() {
        let store = LocalStore::in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);
        engine.state.mark_synchronized();
        let dave = peer("dave");

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_event_loop(engine.clone(), rx, CancellationToken::new()));

        tx.send(LiveEvent::UserUpdated(dave.clone())).await.unwrap();
        tx.send(LiveEvent::Disconnected).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.user(dave.uuid).await.unwrap(), Some(dave));
        assert!(!engine.is_synchronized());
    }

    #[tokio::test]
    async fn reconnect_triggers_synchronize() {
        let store = LocalStore::in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);

        engine.handle_event(LiveEvent::Connected).await.unwrap();
        assert!(engine.is_synchronized());
        assert!(matches!(
            gateway.requests().as_slice(),
            [Request::Synchronize { .. }]
        ));

        engine.handle_event(LiveEvent::Connected).await.unwrap();
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn typing_is_published_but_not_stored() {
        let store = LocalStore::in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine_over(&gateway, &store);
        let mut changes = engine.subscribe();
        let bob = peer("bob");

        engine
            .handle_event(LiveEvent::Typing(bob.clone()))
            .await
            .unwrap();

        assert_eq!(changes.try_recv().unwrap(), StoreChange::Typing(bob.clone()));
        assert!(store.user(bob.uuid).await.unwrap().is_none());
    }
}
