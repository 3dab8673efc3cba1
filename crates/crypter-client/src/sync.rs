//! Catch-up after a reconnect.
//!
//! The window is derived from what the cache already holds: everything that
//! changed after the newest known activity, plus every unread message from
//! the oldest one the cache knows about. The payload is applied in a fixed
//! order (conferences, messages, read receipts, unread messages) so that
//! receipts find the messages they refer to.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crypter_shared::types::now;
use crypter_store::{Filter, Order, Query, SortField};

use crate::engine::{ensure_live, until_cancelled, Ingest, SyncEngine};
use crate::error::{Result, SyncError};

/// Timestamps sent to the synchronize endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// Unread messages dated at or after this are re-sent.
    pub min_timestamp: i64,
    /// Changes after this are re-sent.
    pub max_timestamp: i64,
}

impl SyncWindow {
    /// `latest` is the newest locally known activity, `oldest_unread` the
    /// date of the oldest locally known unread message. An empty cache asks
    /// only for what happens from `now` on.
    pub fn compute(latest: Option<i64>, oldest_unread: Option<i64>, now: i64) -> Self {
        let max_timestamp = latest.unwrap_or(now);
        let min_timestamp = oldest_unread.map_or(max_timestamp, |date| date.min(max_timestamp));
        Self {
            min_timestamp,
            max_timestamp,
        }
    }
}

/// Outcome of one synchronize run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub window: SyncWindow,
    pub conferences: usize,
    pub messages: usize,
    pub read_receipts: usize,
    /// Receipts for messages not cached yet, kept for later.
    pub deferred_receipts: usize,
    pub unread_messages: usize,
    /// Stages or receipts that failed and were skipped.
    pub failures: usize,
}

impl SyncEngine {
    /// Fetch and apply everything missed while offline.
    ///
    /// The client counts as synchronized afterwards even when the run
    /// failed, unless it was cancelled. Concurrent calls run one at a time.
    pub async fn synchronize(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let _running = self.sync_lock.lock().await;

        let result = self.run_synchronize(cancel).await;
        match &result {
            Err(SyncError::Cancelled) => {}
            Err(e) => {
                warn!(error = %e, "synchronize failed");
                self.state.mark_synchronized();
            }
            Ok(report) => {
                info!(
                    conferences = report.conferences,
                    messages = report.messages,
                    read = report.read_receipts,
                    deferred = report.deferred_receipts,
                    unread = report.unread_messages,
                    failures = report.failures,
                    "synchronize finished"
                );
                self.state.mark_synchronized();
            }
        }
        result
    }

    async fn local_window(&self) -> Result<SyncWindow> {
        let latest_conference = self
            .cache
            .conferences(Query::new().order(Order::Desc).limit(1))
            .await?
            .first()
            .map(|c| c.updated_at);
        let latest_message = self
            .cache
            .messages(Query::new().order(Order::Desc).limit(1))
            .await?
            .first()
            .map(|m| m.date);
        let latest_read = self
            .cache
            .messages(
                Query::new()
                    .filter(Filter::Read(true))
                    .sort(SortField::ReadAt, Order::Desc)
                    .limit(1),
            )
            .await?
            .first()
            .and_then(|m| m.read_at);
        let oldest_unread = self
            .cache
            .messages(
                Query::new()
                    .filter(Filter::Read(false))
                    .order(Order::Asc)
                    .limit(1),
            )
            .await?
            .first()
            .map(|m| m.date);

        let latest = [latest_conference, latest_message, latest_read]
            .into_iter()
            .flatten()
            .max();
        Ok(SyncWindow::compute(latest, oldest_unread, now()))
    }

    async fn run_synchronize(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        ensure_live(cancel)?;
        let window = self.local_window().await?;
        info!(
            min_timestamp = window.min_timestamp,
            max_timestamp = window.max_timestamp,
            "synchronizing"
        );

        let payload = until_cancelled(
            cancel,
            self.gateway
                .synchronize(window.min_timestamp, window.max_timestamp),
        )
        .await?;

        let conferences = self.decrypt_previews(payload.conferences).await?;
        let messages = self.decrypt_messages(payload.messages).await?;
        let unread = self.decrypt_messages(payload.unread_messages).await?;

        let mut report = SyncReport {
            window,
            ..SyncReport::default()
        };

        ensure_live(cancel)?;
        report.conferences = self
            .sync_stage("conferences", Ingest::Conversations(conferences), &mut report.failures)
            .await;

        ensure_live(cancel)?;
        report.messages = self
            .sync_stage("messages", Ingest::Messages(messages), &mut report.failures)
            .await;

        ensure_live(cancel)?;
        for receipt in payload.read_messages {
            match self.apply_receipt(receipt).await {
                Ok(_) => report.read_receipts += 1,
                Err(SyncError::ReferentialGap(_)) => report.deferred_receipts += 1,
                Err(e) => {
                    warn!(message = %receipt.uuid, error = %e, "read receipt failed");
                    report.failures += 1;
                }
            }
        }

        ensure_live(cancel)?;
        report.unread_messages = self
            .sync_stage("unread messages", Ingest::Messages(unread), &mut report.failures)
            .await;

        Ok(report)
    }

    /// Write one stage; a failure is logged and counted, not propagated.
    async fn sync_stage(&self, stage: &'static str, batch: Ingest, failures: &mut usize) -> usize {
        let count = batch.len();
        match self.ingest(batch).await {
            Ok(()) => count,
            Err(e) => {
                warn!(stage, count, error = %e, "synchronize stage failed");
                *failures += 1;
                0
            }
        }
    }
}
