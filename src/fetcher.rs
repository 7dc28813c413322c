use std::{ops::RangeInclusive, sync::Arc};

use alloy::{
    network::{Ethereum, Network},
    primitives::B256,
    rpc::types::{Filter, Log},
};
use tracing::{debug, warn};

use crate::{
    SyncError,
    rpc_pool::RpcClientPool,
    subscription::Subscription,
    types::{BlockNumber, LogRecord},
};

/// How often a range fetch is retried when the chain moves under it.
const ANCHOR_ATTEMPTS: usize = 3;

/// Retrieves and normalizes logs for one subscription.
///
/// Providers cap `eth_getLogs` spans and result sizes at limits they do not advertise. When a
/// query is rejected as too large the fetcher transparently bisects the range and retries both
/// halves, so callers always work with planner-sized ranges and never see the provider's
/// limits.
#[derive(Debug, Clone)]
pub struct LogFetcher<N: Network = Ethereum> {
    pool: RpcClientPool<N>,
}

impl<N: Network> LogFetcher<N> {
    #[must_use]
    pub fn new(pool: RpcClientPool<N>) -> Self {
        Self { pool }
    }

    /// Fetches all logs matching `subscription` within `range`, in provider order.
    ///
    /// Removed logs and logs missing block metadata (pending) are dropped during
    /// normalization. A single block that still exceeds provider limits is fatal and surfaces
    /// as [`SyncError::FetchFailed`].
    pub async fn fetch(
        &self,
        range: RangeInclusive<BlockNumber>,
        subscription: &Subscription,
    ) -> Result<Vec<LogRecord>, SyncError> {
        let logs = self.fetch_logs(*range.start(), *range.end(), subscription).await?;

        Ok(logs.iter().filter_map(|log| LogRecord::from_log(log, subscription)).collect())
    }

    /// Fetches `range` together with the hash of its end block, retrying until both describe
    /// the same chain.
    ///
    /// `eth_getLogs` and the end-block lookup are separate calls, so a reorg between them
    /// would pair old-chain records with a new-chain hash and hide the reorg from later
    /// checkpoint verification. The end hash is read before and after the log query and the
    /// range is refetched whenever the two reads disagree, or when a record at the end block
    /// carries a different hash. Persistent disagreement surfaces as
    /// [`SyncError::InconsistentRange`].
    pub async fn fetch_anchored(
        &self,
        range: RangeInclusive<BlockNumber>,
        subscription: &Subscription,
    ) -> Result<(Vec<LogRecord>, B256), SyncError> {
        let (from, to) = (*range.start(), *range.end());

        for attempt in 1..=ANCHOR_ATTEMPTS {
            let before = self.end_hash(from, to).await?;
            let records = self.fetch(range.clone(), subscription).await?;
            let after = self.end_hash(from, to).await?;

            let anchored = before == after
                && records
                    .iter()
                    .filter(|r| r.block_number == to)
                    .all(|r| r.block_hash == after);
            if anchored {
                return Ok((records, after));
            }

            warn!(from, to, attempt, "Chain moved while fetching range, refetching");
        }

        Err(SyncError::InconsistentRange { from, to })
    }

    async fn end_hash(&self, from: BlockNumber, to: BlockNumber) -> Result<B256, SyncError> {
        self.pool
            .get_block_hash(to)
            .await
            .map_err(|err| SyncError::FetchFailed { from, to, source: Arc::new(err) })
    }

    async fn fetch_logs(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        subscription: &Subscription,
    ) -> Result<Vec<Log>, SyncError> {
        let filter = build_filter(from, to, subscription);

        match self.pool.get_logs(&filter).await {
            Ok(logs) => Ok(logs),
            Err(err @ SyncError::RangeTooLarge(_)) => {
                if from == to {
                    return Err(SyncError::FetchFailed { from, to, source: Arc::new(err) });
                }

                let mid = from + (to - from) / 2;
                debug!(from, to, mid, "Range rejected by provider, bisecting");

                let mut logs = Box::pin(self.fetch_logs(from, mid, subscription)).await?;
                let upper = Box::pin(self.fetch_logs(mid + 1, to, subscription)).await?;

                logs.extend(upper);
                Ok(logs)
            }
            Err(err) => Err(SyncError::FetchFailed { from, to, source: Arc::new(err) }),
        }
    }
}

fn build_filter(from: BlockNumber, to: BlockNumber, subscription: &Subscription) -> Filter {
    let mut filter = Filter::new().from_block(from).to_block(to);

    if !subscription.addresses.is_empty() {
        filter = filter.address(subscription.addresses.clone());
    }

    let topics = subscription.topics();
    if !topics.is_empty() {
        filter = filter.event_signature(topics);
    }

    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        primitives::b256,
        providers::mock::Asserter,
        rpc::json_rpc::ErrorPayload,
    };

    use crate::test_utils::{TOPIC_TRANSFER, block, log, mocked_pool, subscription};

    fn range_too_large() -> ErrorPayload {
        ErrorPayload {
            code: -32602,
            message: "block range is too large".to_string().into(),
            data: None,
        }
    }

    #[tokio::test]
    async fn normalizes_matching_logs() -> anyhow::Result<()> {
        let hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b1");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        asserter.push_success(&vec![log(10, hash, tx, 0, TOPIC_TRANSFER)]);

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let records = fetcher.fetch(0..=100, &subscription()).await?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].block_number, 10);
        assert_eq!(records[0].event.as_deref(), Some("Transfer"));

        Ok(())
    }

    #[tokio::test]
    async fn bisects_when_provider_rejects_the_range() -> anyhow::Result<()> {
        let hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b1");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        // full range rejected, both halves succeed
        asserter.push_failure(range_too_large());
        asserter.push_success(&vec![log(10, hash, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&vec![log(80, hash, tx, 1, TOPIC_TRANSFER)]);

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let records = fetcher.fetch(0..=100, &subscription()).await?;

        let blocks: Vec<_> = records.iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![10, 80]);

        Ok(())
    }

    #[tokio::test]
    async fn bisection_recurses_until_ranges_fit() -> anyhow::Result<()> {
        let hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b1");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        // [0,100] and [0,50] rejected; [0,25], [26,50] and [51,100] succeed
        asserter.push_failure(range_too_large());
        asserter.push_failure(range_too_large());
        asserter.push_success(&vec![log(5, hash, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&Vec::<alloy::rpc::types::Log>::new());
        asserter.push_success(&vec![log(99, hash, tx, 0, TOPIC_TRANSFER)]);

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let records = fetcher.fetch(0..=100, &subscription()).await?;

        let blocks: Vec<_> = records.iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![5, 99]);

        Ok(())
    }

    #[tokio::test]
    async fn single_block_rejection_is_fatal() {
        let asserter = Asserter::new();
        asserter.push_failure(range_too_large());

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let result = fetcher.fetch(42..=42, &subscription()).await;

        assert!(matches!(result, Err(SyncError::FetchFailed { from: 42, to: 42, .. })));
    }

    #[tokio::test]
    async fn anchored_fetch_returns_records_with_the_end_hash() -> anyhow::Result<()> {
        let end = b256!("0x00000000000000000000000000000000000000000000000000000000000000a0");
        let hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b1");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        asserter.push_success(&block(100, end, hash));
        asserter.push_success(&vec![log(10, hash, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&block(100, end, hash));

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let (records, end_hash) = fetcher.fetch_anchored(0..=100, &subscription()).await?;

        assert_eq!(records.len(), 1);
        assert_eq!(end_hash, end);

        Ok(())
    }

    #[tokio::test]
    async fn chain_movement_during_fetch_triggers_a_refetch() -> anyhow::Result<()> {
        let old_end = b256!("0x00000000000000000000000000000000000000000000000000000000000000a0");
        let new_end = b256!("0x00000000000000000000000000000000000000000000000000000000000000a1");
        let old_hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b0");
        let new_hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b1");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        // a reorg lands between the log query and the second end-hash read
        asserter.push_success(&block(100, old_end, old_hash));
        asserter.push_success(&vec![log(10, old_hash, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&block(100, new_end, new_hash));
        // the refetch sees a settled chain
        asserter.push_success(&block(100, new_end, new_hash));
        asserter.push_success(&vec![log(10, new_hash, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&block(100, new_end, new_hash));

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let (records, end_hash) = fetcher.fetch_anchored(0..=100, &subscription()).await?;

        assert_eq!(end_hash, new_end);
        assert_eq!(records[0].block_hash, new_hash);

        Ok(())
    }

    #[tokio::test]
    async fn stale_record_at_the_end_block_triggers_a_refetch() -> anyhow::Result<()> {
        let end = b256!("0x00000000000000000000000000000000000000000000000000000000000000a0");
        let stale = b256!("0x00000000000000000000000000000000000000000000000000000000000000a9");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        // both hash reads agree but the provider served logs from a replaced end block
        asserter.push_success(&block(100, end, end));
        asserter.push_success(&vec![log(100, stale, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&block(100, end, end));
        // the refetch is consistent
        asserter.push_success(&block(100, end, end));
        asserter.push_success(&vec![log(100, end, tx, 0, TOPIC_TRANSFER)]);
        asserter.push_success(&block(100, end, end));

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let (records, end_hash) = fetcher.fetch_anchored(0..=100, &subscription()).await?;

        assert_eq!(records[0].block_hash, end);
        assert_eq!(end_hash, end);

        Ok(())
    }

    #[tokio::test]
    async fn persistent_chain_movement_is_fatal() {
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let asserter = Asserter::new();
        for n in 0..3u8 {
            let before = alloy::primitives::B256::repeat_byte(2 * n + 1);
            let after = alloy::primitives::B256::repeat_byte(2 * n + 2);
            asserter.push_success(&block(100, before, before));
            asserter.push_success(&vec![log(10, before, tx, 0, TOPIC_TRANSFER)]);
            asserter.push_success(&block(100, after, after));
        }

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let result = fetcher.fetch_anchored(0..=100, &subscription()).await;

        assert!(matches!(result, Err(SyncError::InconsistentRange { from: 0, to: 100 })));
    }

    #[tokio::test]
    async fn removed_logs_are_dropped() -> anyhow::Result<()> {
        let hash = b256!("0x00000000000000000000000000000000000000000000000000000000000000b1");
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000c1");

        let mut removed = log(10, hash, tx, 0, TOPIC_TRANSFER);
        removed.removed = true;

        let asserter = Asserter::new();
        asserter.push_success(&vec![removed, log(11, hash, tx, 1, TOPIC_TRANSFER)]);

        let fetcher = LogFetcher::new(mocked_pool(&asserter));
        let records = fetcher.fetch(0..=100, &subscription()).await?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].block_number, 11);

        Ok(())
    }
}
