//! # crypter-shared
//!
//! Domain records, wire payloads, constants and the end-to-end encryption
//! seam shared by the local store and the synchronization client.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use crypto::{Crypter, SealedBoxCrypter};
pub use error::CryptoError;
pub use protocol::{ReadReceipt, SyncPayload};
pub use types::{Conversation, ConversationType, Message, Participant};
