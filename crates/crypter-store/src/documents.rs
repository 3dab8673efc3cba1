//! Storage shapes of the domain records.
//!
//! Over the wire and in memory, references are nested records. In storage
//! they are flattened to ids so every record lives in exactly one
//! collection; the `users`, `conferences` and `messages` modules hydrate
//! them back on read.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crypter_shared::constants::DEFAULT_CONTENT_TYPE;
use crypter_shared::{Conversation, ConversationType, Message, Participant, ReadReceipt};

use crate::collection::Document;
use crate::error::{Result, StoreError};

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

// ---------------------------------------------------------------------------
// Conference
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceDocument {
    pub uuid: Uuid,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConversationType>,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_messages_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageDocument>,
}

impl From<&Conversation> for ConferenceDocument {
    fn from(c: &Conversation) -> Self {
        Self {
            uuid: c.uuid,
            kind: c.kind,
            updated_at: c.updated_at,
            messages_count: c.messages_count,
            unread_messages_count: c.unread_messages_count,
            participant: c.participant.as_ref().map(|p| p.uuid),
            last_message: c.last_message.as_deref().map(MessageDocument::from),
        }
    }
}

impl ConferenceDocument {
    /// Rebuild the record around already hydrated references.
    pub fn into_conversation(
        self,
        participant: Option<Participant>,
        last_message: Option<Message>,
    ) -> Conversation {
        Conversation {
            uuid: self.uuid,
            kind: self.kind,
            updated_at: self.updated_at,
            messages_count: self.messages_count,
            unread_messages_count: self.unread_messages_count,
            participant,
            last_message: last_message.map(Box::new),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDocument {
    pub uuid: Uuid,
    pub conference: Uuid,
    pub author: Uuid,
    #[serde(default)]
    pub read: bool,
    #[serde(rename = "readAt", default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    #[serde(rename = "type", default = "default_content_type")]
    pub kind: String,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
}

impl From<&Message> for MessageDocument {
    fn from(m: &Message) -> Self {
        Self {
            uuid: m.uuid,
            conference: m.conference.uuid,
            author: m.author.uuid,
            read: m.read,
            read_at: m.read_at,
            kind: m.kind.clone(),
            date: m.date,
            content: m.content.clone(),
            consumed: m.consumed,
            edited: m.edited,
        }
    }
}

impl MessageDocument {
    pub fn into_message(self, conference: Conversation, author: Participant) -> Message {
        Message {
            uuid: self.uuid,
            conference,
            author,
            read: self.read,
            read_at: self.read_at,
            kind: self.kind,
            date: self.date,
            content: self.content,
            consumed: self.consumed,
            edited: self.edited,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions to / from raw documents
// ---------------------------------------------------------------------------

/// Serialize any storage shape into a raw document.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Json(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        )))),
    }
}

/// Deserialize a raw document into a storage shape.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Storage form of a participant. The private key never reaches disk.
pub fn user_document(p: &Participant) -> Result<Document> {
    let mut doc = to_document(p)?;
    doc.remove("private_key");
    Ok(doc)
}

pub fn conference_document(c: &Conversation) -> Result<Document> {
    to_document(&ConferenceDocument::from(c))
}

pub fn message_document(m: &Message) -> Result<Document> {
    to_document(&MessageDocument::from(m))
}

/// Partial document carrying only the read-receipt fields.
pub fn read_patch(receipt: &ReadReceipt) -> Result<Document> {
    let mut doc = to_document(receipt)?;
    doc.remove("uuid");
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_is_stripped() {
        let p = Participant {
            name: Some("me".into()),
            private_key: Some("secret".into()),
            ..Participant::new(Uuid::new_v4())
        };
        let doc = user_document(&p).unwrap();
        assert!(!doc.contains_key("private_key"));
        assert_eq!(doc["name"], "me");
    }

    #[test]
    fn message_references_are_flattened() {
        let author = Participant::new(Uuid::new_v4());
        let conference = Conversation::new(Uuid::new_v4(), 10);
        let m = Message {
            uuid: Uuid::new_v4(),
            conference: conference.clone(),
            author: author.clone(),
            date: 10,
            ..Default::default()
        };

        let doc = message_document(&m).unwrap();
        assert_eq!(doc["author"], author.uuid.to_string());
        assert_eq!(doc["conference"], conference.uuid.to_string());
    }

    #[test]
    fn unknown_conference_fields_are_not_written() {
        let doc = conference_document(&Conversation::new(Uuid::new_v4(), 200)).unwrap();
        assert!(!doc.contains_key("type"));
        assert!(!doc.contains_key("messages_count"));
        assert!(!doc.contains_key("unread_messages_count"));
        assert_eq!(doc["updated_at"], 200);
    }

    #[test]
    fn read_patch_has_only_receipt_fields() {
        let patch = read_patch(&ReadReceipt {
            uuid: Uuid::new_v4(),
            read: true,
            read_at: Some(3),
        })
        .unwrap();
        assert_eq!(patch.len(), 2);
        assert_eq!(patch["readAt"], 3);
    }
}
