//! Reconciliation policy.
//!
//! Pure functions deciding how local and remote records combine: page
//! de-duplication and ordering, continuation cursors, field-level merges and
//! the order in which a record and its references are written. Nothing here
//! touches the store or the network.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crypter_shared::{Conversation, Message, Participant};
use crypter_store::documents::{conference_document, message_document, user_document};
use crypter_store::{Collection, Document};

use crate::gateway::{Cursor, Direction};

/// Records identified by a uuid.
pub trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for Participant {
    fn key(&self) -> Uuid {
        self.uuid
    }
}

impl Keyed for Conversation {
    fn key(&self) -> Uuid {
        self.uuid
    }
}

impl Keyed for Message {
    fn key(&self) -> Uuid {
        self.uuid
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Append `incoming` to `acc`, replacing records already present by uuid.
///
/// Positions of existing records are kept; the incoming copy wins.
pub fn dedup_merge<T: Keyed>(mut acc: Vec<T>, incoming: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut index: HashMap<Uuid, usize> = HashMap::with_capacity(acc.len());
    let mut unique = Vec::with_capacity(acc.len());
    for record in acc.drain(..) {
        match index.get(&record.key()) {
            Some(&i) => unique[i] = record,
            None => {
                index.insert(record.key(), unique.len());
                unique.push(record);
            }
        }
    }

    for record in incoming {
        match index.get(&record.key()) {
            Some(&i) => unique[i] = record,
            None => {
                index.insert(record.key(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

/// Most recently updated first.
pub fn sort_conversations(page: &mut [Conversation]) {
    page.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.uuid.cmp(&a.uuid))
    });
}

/// Oldest first.
pub fn sort_messages(page: &mut [Message]) {
    page.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.uuid.cmp(&b.uuid)));
}

fn keep<T>(mut page: Vec<T>, from_front: bool, limit: usize) -> Vec<T> {
    if page.len() > limit {
        if from_front {
            page.truncate(limit);
        } else {
            page.drain(..page.len() - limit);
        }
    }
    page
}

/// Cut a sorted message page down to the `limit` records nearest the cursor.
pub fn clamp_messages(page: Vec<Message>, direction: Direction, limit: usize) -> Vec<Message> {
    match direction {
        Direction::Old => keep(page, false, limit),
        Direction::New => keep(page, true, limit),
        Direction::Unread => page,
    }
}

/// Cut a sorted conversation page down to the `limit` records nearest the
/// cursor.
pub fn clamp_conversations(
    page: Vec<Conversation>,
    direction: Direction,
    limit: usize,
) -> Vec<Conversation> {
    match direction {
        Direction::Old => keep(page, true, limit),
        Direction::New => keep(page, false, limit),
        Direction::Unread => page,
    }
}

/// Remote request covering what a sorted local message page lacks.
pub fn message_continuation(local: &[Message], cursor: Cursor) -> Cursor {
    let remaining = cursor.limit.saturating_sub(local.len());
    let anchor = match cursor.direction {
        Direction::Old => local.first().map(|m| m.date),
        Direction::New => local.last().map(|m| m.date),
        Direction::Unread => None,
    };
    match cursor.direction {
        Direction::Unread => cursor,
        _ => cursor.continue_at(anchor.unwrap_or(cursor.timestamp), remaining),
    }
}

/// Remote request covering what a sorted local conversation page lacks.
pub fn conversation_continuation(local: &[Conversation], cursor: Cursor) -> Cursor {
    let remaining = cursor.limit.saturating_sub(local.len());
    let anchor = match cursor.direction {
        Direction::Old => local.last().map(|c| c.updated_at),
        Direction::New => local.first().map(|c| c.updated_at),
        Direction::Unread => None,
    };
    match cursor.direction {
        Direction::Unread => cursor,
        _ => cursor.continue_at(anchor.unwrap_or(cursor.timestamp), remaining),
    }
}

// ---------------------------------------------------------------------------
// Field merges
// ---------------------------------------------------------------------------

/// Last-write-wins per field. Null incoming values never erase.
pub fn merge_fields(mut existing: Document, incoming: Document) -> Document {
    for (key, value) in incoming {
        if !value.is_null() {
            existing.insert(key, value);
        }
    }
    existing
}

fn fill_absent(mut existing: Document, incoming: Document) -> Document {
    for (key, value) in incoming {
        if !value.is_null() {
            existing.entry(key).or_insert(value);
        }
    }
    existing
}

/// Keep `unread_messages_count <= messages_count` on a merged conference.
fn clamp_unread(mut doc: Document) -> Document {
    let total = doc.get("messages_count").and_then(Value::as_u64);
    let unread = doc.get("unread_messages_count").and_then(Value::as_u64);
    if let (Some(total), Some(unread)) = (total, unread) {
        if unread > total {
            doc.insert("unread_messages_count".into(), Value::from(total));
        }
    }
    doc
}

/// A conference older than the stored one only fills fields the stored
/// copy lacks.
pub fn merge_conference(existing: Document, incoming: Document) -> Document {
    let stored = existing.get("updated_at").and_then(Value::as_i64);
    let fresh = incoming.get("updated_at").and_then(Value::as_i64);
    let merged = match (stored, fresh) {
        (Some(stored), Some(fresh)) if fresh < stored => fill_absent(existing, incoming),
        _ => merge_fields(existing, incoming),
    };
    clamp_unread(merged)
}

/// Merge function used for `collection`.
pub fn merge_for(collection: Collection) -> fn(Document, Document) -> Document {
    match collection {
        Collection::Conferences => merge_conference,
        Collection::Users | Collection::Messages => merge_fields,
    }
}

// ---------------------------------------------------------------------------
// Cascade writes
// ---------------------------------------------------------------------------

/// Documents to write, grouped by collection.
///
/// [`CascadePlan::stages`] yields users, then conferences, then messages, so
/// every reference is written before the record that points at it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CascadePlan {
    pub users: Vec<Document>,
    pub conferences: Vec<Document>,
    pub messages: Vec<Document>,
}

impl CascadePlan {
    pub fn for_users(users: &[Participant]) -> crypter_store::Result<Self> {
        let mut plan = Self::default();
        for user in users {
            plan.users.push(user_document(user)?);
        }
        Ok(plan)
    }

    pub fn for_conversations(conversations: &[Conversation]) -> crypter_store::Result<Self> {
        let mut plan = Self::default();
        for conversation in conversations {
            plan.push_conversation(conversation)?;
        }
        Ok(plan)
    }

    /// Author, then conference participant, then conference, then message.
    pub fn for_messages(messages: &[Message]) -> crypter_store::Result<Self> {
        let mut plan = Self::default();
        for message in messages {
            plan.users.push(user_document(&message.author)?);
            plan.push_conversation(&message.conference)?;
            plan.messages.push(message_document(message)?);
        }
        Ok(plan)
    }

    fn push_conversation(&mut self, conversation: &Conversation) -> crypter_store::Result<()> {
        if let Some(participant) = &conversation.participant {
            self.users.push(user_document(participant)?);
        }
        if let Some(last) = &conversation.last_message {
            self.users.push(user_document(&last.author)?);
        }

        let mut doc = conference_document(conversation)?;
        if conversation.updated_at == 0 {
            // Reference-only copy embedded in a message.
            doc.retain(|key, _| matches!(key.as_str(), "uuid" | "type" | "participant"));
        }
        self.conferences.push(doc);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.conferences.is_empty() && self.messages.is_empty()
    }

    pub fn stages(self) -> [(Collection, Vec<Document>); 3] {
        [
            (Collection::Users, self.users),
            (Collection::Conferences, self.conferences),
            (Collection::Messages, self.messages),
        ]
    }
}
