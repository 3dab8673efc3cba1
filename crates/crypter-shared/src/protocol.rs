use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Conversation, Message};

// ---------------------------------------------------------------------------
// Event stream names
// ---------------------------------------------------------------------------

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_USER_UPDATED: &str = "user.updated";
pub const EVENT_CONFERENCE_UPDATED: &str = "conference.updated";
pub const EVENT_MESSAGE_SENT: &str = "private.message.sent";
pub const EVENT_MESSAGE_READ: &str = "private.message.read";
pub const EVENT_MESSAGES_READ_SINCE: &str = "private.message.read_since";
pub const EVENT_WROTE_TO_USER: &str = "wrote.to.user";

// Client-originated requests (acknowledged by the server).
pub const EMIT_SEND_MESSAGE: &str = "private.message.send";
pub const EMIT_READ_MESSAGE: &str = "private.message.read";
pub const EMIT_WRITE_TO_USER: &str = "write.to.user";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Read-receipt fields of a message. Any other fields the server sends
/// alongside are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub uuid: Uuid,
    #[serde(default = "read_default")]
    pub read: bool,
    #[serde(rename = "readAt", default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
}

fn read_default() -> bool {
    true
}

impl From<&Message> for ReadReceipt {
    fn from(m: &Message) -> Self {
        Self {
            uuid: m.uuid,
            read: m.read,
            read_at: m.read_at,
        }
    }
}

/// Everything that changed while the client was offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(default, alias = "conversations")]
    pub conferences: Vec<Conversation>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, alias = "readMessages")]
    pub read_messages: Vec<ReadReceipt>,
    #[serde(default, alias = "unreadMessages")]
    pub unread_messages: Vec<Message>,
}

/// Body of a `private.message.send` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub conference: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}
