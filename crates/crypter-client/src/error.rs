use thiserror::Error;
use uuid::Uuid;

use crypter_shared::constants::TIMEOUT_STATUSES;
use crypter_shared::CryptoError;
use crypter_store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Storage(#[from] StoreError),

    #[error("Remote API returned HTTP {status}")]
    Http { status: u16 },

    #[error("Remote API unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Referenced record {0} is not known locally")]
    ReferentialGap(Uuid),

    #[error("Encryption error: {0}")]
    Encryption(#[from] CryptoError),

    #[error("Authenticated user has no private key loaded")]
    MissingPrivateKey,

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Event stream is not connected")]
    Disconnected,

    #[error("Server rejected {event}")]
    Rejected { event: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the failure should fall back to the local page instead of
    /// surfacing to the caller.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Http { status } => TIMEOUT_STATUSES.contains(status),
            Self::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status, when the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_timeouts_are_recognised() {
        assert!(SyncError::Http { status: 408 }.is_timeout());
        assert!(SyncError::Http { status: 504 }.is_timeout());
        assert!(!SyncError::Http { status: 500 }.is_timeout());
        assert!(!SyncError::Cancelled.is_timeout());
    }

    #[test]
    fn status_is_exposed() {
        assert_eq!(SyncError::Http { status: 404 }.status(), Some(404));
        assert_eq!(SyncError::MissingPrivateKey.status(), None);
    }
}
