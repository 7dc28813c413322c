use std::{collections::HashMap, ops::RangeInclusive};

use alloy::primitives::BlockNumber;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::{Checkpoint, DedupKey};

/// Errors surfaced by a checkpoint store implementation.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The stored checkpoint did not match the expected prior value.
    ///
    /// Indicates a concurrent writer (for example two engine instances racing after a
    /// restart); the losing worker halts rather than corrupting the cursor.
    #[error(
        "checkpoint for {subscription_id} changed concurrently \
         (expected {expected:?}, found {found:?})"
    )]
    Conflict {
        subscription_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// The backend failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistence seam for subscription checkpoints and the delivery ledger.
///
/// Implementations are provided by the embedding application (database, file, ...). The engine
/// requires two disciplines:
///
/// - compare-and-swap checkpoints: a store must reject a write whose expected prior value no
///   longer matches, so a crashed-and-restarted worker can never double-advance a cursor;
/// - a per-subscription delivery ledger of `(DedupKey, block number)` entries, appended once a
///   batch is acknowledged and reloaded on worker start, so a crash between acknowledgement
///   and the checkpoint write does not redeliver the acknowledged records.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the last persisted checkpoint for a subscription, if any.
    async fn load(&self, subscription_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Stores `new` only if the current value equals `expected`.
    ///
    /// `expected == None` asserts that no checkpoint exists yet. A reorg rollback is a regular
    /// compare-and-swap whose `new.number` is lower than `expected`.
    async fn compare_and_swap(
        &self,
        subscription_id: &str,
        expected: Option<&Checkpoint>,
        new: &Checkpoint,
    ) -> Result<(), StoreError>;

    /// Loads the persisted delivery ledger for a subscription.
    async fn load_delivered(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<(DedupKey, BlockNumber)>, StoreError>;

    /// Appends acknowledged deliveries to the ledger.
    ///
    /// Called after the handler accepted a batch and before the checkpoint advances past it.
    async fn append_delivered(
        &self,
        subscription_id: &str,
        keys: &[(DedupKey, BlockNumber)],
    ) -> Result<(), StoreError>;

    /// Drops ledger entries whose block number falls outside `keep`.
    ///
    /// The engine calls this with an open lower bound when rolling back a reorg (forget
    /// everything above the common ancestor) and with an open upper bound when pruning (forget
    /// everything below the reorg lookback window, which is never refetched).
    async fn retain_delivered(
        &self,
        subscription_id: &str,
        keep: RangeInclusive<BlockNumber>,
    ) -> Result<(), StoreError>;
}

/// Checkpoint store backed by process-local maps.
///
/// Suitable for tests and demos; production deployments plug in a durable implementation.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    delivered: Mutex<HashMap<String, HashMap<DedupKey, BlockNumber>>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, subscription_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.lock().await.get(subscription_id).copied())
    }

    async fn compare_and_swap(
        &self,
        subscription_id: &str,
        expected: Option<&Checkpoint>,
        new: &Checkpoint,
    ) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.lock().await;
        let current = checkpoints.get(subscription_id);

        if current.copied() != expected.copied() {
            return Err(StoreError::Conflict {
                subscription_id: subscription_id.to_string(),
                expected: expected.map(|c| c.number),
                found: current.map(|c| c.number),
            });
        }

        checkpoints.insert(subscription_id.to_string(), *new);
        Ok(())
    }

    async fn load_delivered(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<(DedupKey, BlockNumber)>, StoreError> {
        Ok(self
            .delivered
            .lock()
            .await
            .get(subscription_id)
            .map(|ledger| ledger.iter().map(|(key, number)| (*key, *number)).collect())
            .unwrap_or_default())
    }

    async fn append_delivered(
        &self,
        subscription_id: &str,
        keys: &[(DedupKey, BlockNumber)],
    ) -> Result<(), StoreError> {
        let mut delivered = self.delivered.lock().await;
        let ledger = delivered.entry(subscription_id.to_string()).or_default();
        for (key, number) in keys {
            ledger.insert(*key, *number);
        }
        Ok(())
    }

    async fn retain_delivered(
        &self,
        subscription_id: &str,
        keep: RangeInclusive<BlockNumber>,
    ) -> Result<(), StoreError> {
        if let Some(ledger) = self.delivered.lock().await.get_mut(subscription_id) {
            ledger.retain(|_, number| keep.contains(number));
        }
        Ok(())
    }
}
