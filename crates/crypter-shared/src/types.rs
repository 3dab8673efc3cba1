//! Domain records exchanged with the REST API, the event stream and the UI.
//!
//! References (`author`, `conference`, `participant`) are nested sub-objects
//! here; flattening them to ids is a storage detail of `crypter-store`.
//! Every timestamp is epoch seconds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_CONTENT_TYPE;

/// Current time as epoch seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A user known to the client.
///
/// Every field except `uuid` is optional so that a partial sighting
/// (e.g. `{uuid, email}`) can be merged over an earlier one without
/// erasing what was already known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Only ever set for the authenticated user, and only in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conferences_count: Option<u32>,
}

impl Participant {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    #[default]
    Private,
    Public,
    Secret,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::Secret => "secret",
        }
    }
}

/// A thread between the local user and a participant (or a group).
///
/// Like [`Participant`], the descriptive fields are optional: an update
/// that leaves them out must not reset what the cache already knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
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
    pub participant: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Box<Message>>,
}

impl Conversation {
    pub fn new(uuid: Uuid, updated_at: i64) -> Self {
        Self {
            uuid,
            updated_at,
            ..Default::default()
        }
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_messages_count.unwrap_or(0)
    }

    /// Whether `last_message.content` arrives encrypted for the local user.
    pub fn has_encrypted_preview(&self) -> bool {
        self.kind.unwrap_or_default() == ConversationType::Private && self.last_message.is_some()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

/// A single message. `content` is ciphertext on the wire and plaintext once
/// ingested by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: Uuid,
    pub conference: Conversation,
    pub author: Participant,
    #[serde(default)]
    pub read: bool,
    #[serde(rename = "readAt", default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    #[serde(rename = "type", default = "default_content_type")]
    pub kind: String,
    pub date: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
}
