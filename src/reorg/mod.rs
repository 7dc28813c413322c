//! Chain reorganization detection.
//!
//! The detector keeps a bounded history of block hashes it has confirmed and compares the
//! checkpoint's hash against the chain on every live tick. A mismatch is first re-checked
//! (providers behind load balancers briefly disagree near the tip), then resolved by walking
//! the history backwards until a block whose hash still matches the chain is found. That block
//! is the common ancestor; everything above it is invalidated.

mod ring_buffer;

use alloy::{
    network::{Ethereum, Network},
    primitives::{B256, BlockNumber},
};
use tracing::{debug, info, warn};

use crate::{
    SyncError,
    reorg::ring_buffer::BlockHashHistory,
    rpc_pool::RpcClientPool,
    types::{Checkpoint, ReorgEvent},
};

/// Where the detector currently stands with respect to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgState {
    /// The checkpoint hash matches the chain.
    Stable,
    /// One mismatch observed, awaiting confirmation.
    Suspect,
    /// A reorg was confirmed and awaits rollback via [`ReorgDetector::resolve`].
    Reorging,
}

/// Detects reorgs against a subscription's checkpoint.
#[derive(Debug)]
pub struct ReorgDetector<N: Network = Ethereum> {
    pool: RpcClientPool<N>,
    history: BlockHashHistory,
    state: ReorgState,
    lookback: u64,
}

impl<N: Network> ReorgDetector<N> {
    /// # Panics
    /// Panics if `lookback` is zero.
    #[must_use]
    pub fn new(pool: RpcClientPool<N>, lookback: u64) -> Self {
        let capacity = usize::try_from(lookback).unwrap_or(usize::MAX);
        Self { pool, history: BlockHashHistory::new(capacity), state: ReorgState::Stable, lookback }
    }

    #[must_use]
    pub fn state(&self) -> ReorgState {
        self.state
    }

    /// Records a block the engine has fully processed.
    pub fn record(&mut self, number: BlockNumber, hash: B256) {
        self.history.record(number, hash);
    }

    /// Verifies the checkpoint against the chain.
    ///
    /// Returns `Ok(None)` while the checkpoint is canonical and `Ok(Some(event))` once a reorg
    /// is confirmed. The caller must then roll its state back to the event's ancestor and call
    /// [`ReorgDetector::resolve`]. Fails with [`SyncError::IrreconcilableReorg`] when the
    /// divergence reaches past the recorded history.
    pub async fn check(&mut self, checkpoint: &Checkpoint) -> Result<Option<ReorgEvent>, SyncError> {
        if self.remote_hash(checkpoint.number).await? == Some(checkpoint.hash) {
            self.state = ReorgState::Stable;
            return Ok(None);
        }

        self.state = ReorgState::Suspect;
        debug!(checkpoint = %checkpoint, "Checkpoint hash mismatch, re-checking");

        // one confirming fetch filters out transiently inconsistent providers
        if self.remote_hash(checkpoint.number).await? == Some(checkpoint.hash) {
            self.state = ReorgState::Stable;
            return Ok(None);
        }

        warn!(
            checkpoint = %checkpoint,
            history = self.history.len(),
            "Reorg confirmed, walking back for common ancestor"
        );
        let ancestor = self.find_common_ancestor(checkpoint.number).await?;
        self.state = ReorgState::Reorging;

        let event = ReorgEvent {
            common_ancestor: ancestor,
            invalidated: ancestor.number + 1..=checkpoint.number,
        };
        info!(
            ancestor = %event.common_ancestor,
            invalidated = ?event.invalidated,
            "Reorg resolved to common ancestor"
        );
        Ok(Some(event))
    }

    /// Acknowledges that the caller rolled back to `ancestor`.
    pub fn resolve(&mut self, ancestor: &Checkpoint) {
        self.history.rollback_to(ancestor.number);
        self.state = ReorgState::Stable;
    }

    async fn find_common_ancestor(&self, tip: BlockNumber) -> Result<Checkpoint, SyncError> {
        for (number, local_hash) in self.history.iter_newest_first() {
            if number >= tip {
                continue;
            }
            if self.remote_hash(number).await? == Some(local_hash) {
                return Ok(Checkpoint::new(number, local_hash));
            }
            debug!(number, "Block no longer canonical");
        }

        Err(SyncError::IrreconcilableReorg { lookback: self.lookback })
    }

    /// Block hash at `number`, with `None` when the chain no longer has that block.
    async fn remote_hash(&self, number: BlockNumber) -> Result<Option<B256>, SyncError> {
        match self.pool.get_block_hash(number).await {
            Ok(hash) => Ok(Some(hash)),
            Err(SyncError::BlockNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
