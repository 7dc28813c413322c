use std::{fmt, ops::RangeInclusive};

use alloy::{
    primitives::{Address, B256, Bytes},
    rpc::types::Log,
};

pub use alloy::primitives::BlockNumber;
use tokio::sync::mpsc;
use tracing::warn;

use crate::subscription::Subscription;

/// A normalized event log as delivered to handlers.
///
/// The `(block_hash, transaction_hash, log_index)` triple uniquely identifies a record within
/// a given chain state and is the basis for exactly-once delivery; see [`LogRecord::dedup_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub block_number: BlockNumber,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub address: Address,
    /// Raw topics, `topics[0]` being the event signature hash.
    pub topics: Vec<B256>,
    /// Raw ABI-encoded event data.
    pub data: Bytes,
    /// Decoded event name, resolved from the subscription's registered signatures.
    pub event: Option<String>,
}

impl LogRecord {
    /// Unique identity of this record within a chain state.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            block_hash: self.block_hash,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    /// Normalizes a raw RPC log into a record.
    ///
    /// Returns `None` for logs flagged as removed or missing block metadata (both can appear
    /// around reorgs); such logs are re-fetched on the next canonical pass.
    pub(crate) fn from_log(log: &Log, subscription: &Subscription) -> Option<Self> {
        if log.removed {
            warn!(address = %log.address(), "Skipping removed log");
            return None;
        }

        let (Some(block_number), Some(block_hash), Some(transaction_hash), Some(log_index)) =
            (log.block_number, log.block_hash, log.transaction_hash, log.log_index)
        else {
            warn!(address = %log.address(), "Skipping log without block metadata");
            return None;
        };

        let topics = log.topics().to_vec();
        let event = topics.first().and_then(|topic0| subscription.event_name(topic0));

        Some(Self {
            block_number,
            block_hash,
            transaction_hash,
            log_index,
            address: log.address(),
            topics,
            data: log.inner.data.data.clone(),
            event: event.map(str::to_owned),
        })
    }
}

/// Identity used to deduplicate deliveries: no two handler deliveries ever share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// The last block confirmed as canonical and fully dispatched for a subscription.
///
/// Checkpoints advance monotonically in block number during normal operation and are only
/// rolled back by a [`ReorgEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub number: BlockNumber,
    pub hash: B256,
}

impl Checkpoint {
    #[must_use]
    pub fn new(number: BlockNumber, hash: B256) -> Self {
        Self { number, hash }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// A confirmed chain reorganization.
///
/// Everything after `common_ancestor` is no longer canonical; `invalidated` is the block range
/// downstream consumers must discard and the engine re-fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    pub common_ancestor: Checkpoint,
    pub invalidated: RangeInclusive<BlockNumber>,
}

/// Send-or-stop helper for worker event channels.
///
/// Returns `false` when the receiving side is gone, signalling the caller to stop producing.
pub(crate) trait TryStream<T> {
    async fn try_stream<M: Into<T>>(&self, msg: M) -> bool;
}

impl<T: fmt::Debug> TryStream<T> for mpsc::Sender<T> {
    async fn try_stream<M: Into<T>>(&self, msg: M) -> bool {
        if let Err(err) = self.send(msg.into()).await {
            warn!(error = %err, "Downstream channel closed, stopping stream");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TOPIC_TRANSFER, log, subscription};
    use alloy::primitives::b256;

    #[test]
    fn dedup_key_ignores_block_number() {
        let hash = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");
        let tx = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");

        let mut a = LogRecord::from_log(&log(10, hash, tx, 0, TOPIC_TRANSFER), &subscription())
            .expect("valid log");
        let b = a.clone();
        a.block_number = 11;

        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn removed_logs_are_dropped() {
        let hash = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");
        let tx = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");

        let mut raw = log(10, hash, tx, 0, TOPIC_TRANSFER);
        raw.removed = true;

        assert!(LogRecord::from_log(&raw, &subscription()).is_none());
    }

    #[test]
    fn logs_without_block_metadata_are_dropped() {
        let hash = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");
        let tx = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");

        let mut raw = log(10, hash, tx, 0, TOPIC_TRANSFER);
        raw.block_number = None;

        assert!(LogRecord::from_log(&raw, &subscription()).is_none());
    }

    #[test]
    fn event_name_is_resolved_from_subscription() {
        let hash = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");
        let tx = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");

        let record = LogRecord::from_log(&log(10, hash, tx, 0, TOPIC_TRANSFER), &subscription())
            .expect("valid log");

        assert_eq!(record.event.as_deref(), Some("Transfer"));
    }
}
