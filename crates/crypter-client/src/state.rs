//! Process-wide sync flags shared by the engine and the event loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crypter_shared::ReadReceipt;

struct PendingRead {
    receipt: ReadReceipt,
    queued_at: Instant,
}

/// Whether the local store reflects the server, plus read receipts that
/// arrived before their message.
pub struct SyncState {
    synchronized: AtomicBool,
    pending_reads: Mutex<HashMap<Uuid, PendingRead>>,
    pending_ttl: Duration,
}

impl SyncState {
    pub fn new(pending_ttl: Duration) -> Self {
        Self {
            synchronized: AtomicBool::new(false),
            pending_reads: Mutex::new(HashMap::new()),
            pending_ttl,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }

    pub fn mark_synchronized(&self) {
        self.synchronized.store(true, Ordering::SeqCst);
    }

    /// Returns the previous value.
    pub fn mark_desynchronized(&self) -> bool {
        self.synchronized.swap(false, Ordering::SeqCst)
    }

    /// Keep `receipt` until its message is ingested or the TTL runs out.
    pub fn defer_read(&self, receipt: ReadReceipt) {
        let Ok(mut pending) = self.pending_reads.lock() else {
            tracing::error!("pending read receipts lock poisoned");
            return;
        };
        pending.insert(
            receipt.uuid,
            PendingRead {
                receipt,
                queued_at: Instant::now(),
            },
        );
    }

    /// Remove and return the live receipts for `ids`, dropping expired ones.
    pub fn take_pending<I>(&self, ids: I) -> Vec<ReadReceipt>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let Ok(mut pending) = self.pending_reads.lock() else {
            return Vec::new();
        };

        let ttl = self.pending_ttl;
        let before = pending.len();
        pending.retain(|_, p| p.queued_at.elapsed() <= ttl);
        let expired = before - pending.len();
        if expired > 0 {
            tracing::debug!(count = expired, "dropped expired read receipts");
        }

        if pending.is_empty() {
            return Vec::new();
        }
        ids.into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(|p| p.receipt)
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_reads.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> ReadReceipt {
        ReadReceipt {
            uuid: Uuid::new_v4(),
            read: true,
            read_at: Some(1),
        }
    }

    #[test]
    fn starts_unsynchronized() {
        let state = SyncState::new(Duration::from_secs(1));
        assert!(!state.is_synchronized());
        state.mark_synchronized();
        assert!(state.mark_desynchronized());
        assert!(!state.is_synchronized());
    }

    #[test]
    fn pending_receipt_is_taken_once() {
        let state = SyncState::new(Duration::from_secs(60));
        let r = receipt();
        state.defer_read(r);

        assert!(state.take_pending([Uuid::new_v4()]).is_empty());
        assert_eq!(state.take_pending([r.uuid]), vec![r]);
        assert!(state.take_pending([r.uuid]).is_empty());
    }

    #[test]
    fn expired_receipts_are_dropped() {
        let state = SyncState::new(Duration::ZERO);
        let r = receipt();
        state.defer_read(r);
        std::thread::sleep(Duration::from_millis(5));

        assert!(state.take_pending([r.uuid]).is_empty());
        assert_eq!(state.pending_len(), 0);
    }
}
