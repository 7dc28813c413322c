use std::{
    collections::{HashMap, HashSet},
    ops::RangeInclusive,
    sync::Arc,
    time::Duration,
};

use alloy::primitives::BlockNumber;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    SyncError,
    handler::{CommitToken, EventHandler},
    store::{CheckpointStore, StoreError},
    types::{DedupKey, LogRecord},
};

/// Outcome of a successful batch delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// Records handed to the handler.
    pub delivered: usize,
    /// Records suppressed because they were already delivered.
    pub deduplicated: usize,
}

/// Orders, deduplicates and delivers log records to one subscription's handler.
///
/// Each dispatcher is owned by a single worker, so the dedup ledger needs no locking. Records
/// are delivered ordered by `(block_number, log_index)` and a [`DedupKey`] is never delivered
/// twice. The ledger is mirrored into the [`CheckpointStore`] after each acknowledged batch
/// and reloaded via [`EventDispatcher::restore`] on worker start, so redelivery after a crash
/// or an overlapping re-fetch stays invisible to handlers. Keys older than the reorg lookback
/// window are pruned as the checkpoint advances, keeping the ledger bounded on live
/// subscriptions.
pub struct EventDispatcher {
    subscription_id: String,
    handler: Arc<dyn EventHandler>,
    store: Arc<dyn CheckpointStore>,
    delivered: HashMap<DedupKey, BlockNumber>,
    max_attempts: usize,
    retry_delay: Duration,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscription_id", &self.subscription_id)
            .field("delivered", &self.delivered.len())
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new(
        subscription_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        store: Arc<dyn CheckpointStore>,
        max_attempts: usize,
        retry_delay: Duration,
    ) -> Self {
        assert!(max_attempts >= 1, "max_attempts must be at least 1");
        Self {
            subscription_id: subscription_id.into(),
            handler,
            store,
            delivered: HashMap::new(),
            max_attempts,
            retry_delay,
        }
    }

    /// Seeds the dedup ledger from the store's persisted deliveries.
    ///
    /// Covers the crash window between a handler acknowledgement and the checkpoint write: the
    /// restarted worker refetches the acknowledged range, and the reloaded keys suppress it.
    pub async fn restore(&mut self) -> Result<(), StoreError> {
        let persisted = self.store.load_delivered(&self.subscription_id).await?;
        if !persisted.is_empty() {
            debug!(
                subscription = %self.subscription_id,
                restored = persisted.len(),
                "Restored delivery ledger"
            );
        }
        self.delivered.extend(persisted);
        Ok(())
    }

    /// Delivers `records` for the given block range, retrying handler failures.
    ///
    /// An all-duplicates batch (and an empty one) commits without touching the handler.
    /// Exhausting the attempt budget returns [`SyncError::DeliveryFailed`]; no key from the
    /// failed batch is marked delivered, so the whole batch is redelivered on the next try.
    pub async fn dispatch(
        &mut self,
        range: RangeInclusive<BlockNumber>,
        mut records: Vec<LogRecord>,
    ) -> Result<DispatchOutcome, SyncError> {
        records.sort_by_key(|r| (r.block_number, r.log_index));

        let before = records.len();
        let mut seen = HashSet::new();
        records.retain(|r| {
            let key = r.dedup_key();
            !self.delivered.contains_key(&key) && seen.insert(key)
        });
        let outcome =
            DispatchOutcome { delivered: records.len(), deduplicated: before - records.len() };

        if records.is_empty() {
            debug!(subscription = %self.subscription_id, deduplicated = outcome.deduplicated,
                "Nothing new to deliver");
            return Ok(outcome);
        }

        let token =
            CommitToken { subscription_id: self.subscription_id.clone(), range };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.on_batch(&records, &token).await {
                Ok(()) => {
                    let keys: Vec<_> =
                        records.iter().map(|r| (r.dedup_key(), r.block_number)).collect();
                    self.store.append_delivered(&self.subscription_id, &keys).await?;
                    self.delivered.extend(keys);
                    debug!(batch = %token, count = records.len(), "Batch delivered");
                    return Ok(outcome);
                }
                Err(err) => {
                    warn!(batch = %token, attempt, error = %err, "Handler failed batch");
                    if attempt >= self.max_attempts {
                        return Err(SyncError::DeliveryFailed { attempts: attempt, source: err });
                    }
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Forgets deliveries above `after` so a reorged range can be delivered again.
    pub async fn rollback(&mut self, after: BlockNumber) -> Result<(), StoreError> {
        self.delivered.retain(|_, number| *number <= after);
        self.store.retain_delivered(&self.subscription_id, 0..=after).await
    }

    /// Drops deliveries below `below`, which the planner can never refetch.
    ///
    /// Called as the checkpoint advances past the reorg lookback window, so the ledger stays
    /// proportional to the window instead of growing with the subscription's lifetime.
    pub async fn prune(&mut self, below: BlockNumber) -> Result<(), StoreError> {
        if below == 0 {
            return Ok(());
        }
        self.delivered.retain(|_, number| *number >= below);
        self.store.retain_delivered(&self.subscription_id, below..=BlockNumber::MAX).await
    }

    #[cfg(test)]
    fn ledger_len(&self) -> usize {
        self.delivered.len()
    }
}
