use std::{collections::HashMap, sync::Arc};

use alloy::network::{Ethereum, Network};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    SyncError,
    config::{MAX_BUFFERED_EVENTS, SyncConfig},
    dispatcher::EventDispatcher,
    fetcher::LogFetcher,
    handler::EventHandler,
    planner::RangePlanner,
    poller::{LivePoller, catch_up_range},
    reorg::ReorgDetector,
    rpc_pool::RpcClientPool,
    store::CheckpointStore,
    subscription::Subscription,
    types::{Checkpoint, ReorgEvent, TryStream},
};

/// Progress notifications emitted on a subscription's event stream.
///
/// The stream is observability, not state: all durable progress lives in the
/// [`CheckpointStore`]. Dropping the stream stops the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A range was fetched, delivered and persisted up to this checkpoint.
    CheckpointAdvanced(Checkpoint),
    /// Historical backfill caught up with the chain head; polling begins.
    SwitchedToLive,
    /// A reorg was confirmed and the checkpoint rolled back to the event's ancestor.
    ReorgDetected(ReorgEvent),
    /// A bounded subscription reached its end block. The worker is done.
    BackfillCompleted,
    /// The worker hit a fatal error and stopped. Other subscriptions are unaffected.
    SubscriptionHalted(SyncError),
}

/// Orchestrates one sync worker per subscription over shared RPC pools.
///
/// Workers are isolated: a halted subscription never takes down its siblings, they only share
/// the rate-limited pools and the checkpoint store. [`SyncEngine::shutdown`] cancels all
/// workers and waits for each to finish its in-flight range, so a later restart resumes from
/// a consistent checkpoint.
pub struct SyncEngine<N: Network = Ethereum> {
    config: SyncConfig,
    pools: HashMap<String, RpcClientPool<N>>,
    store: Arc<dyn CheckpointStore>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<N: Network> std::fmt::Debug for SyncEngine<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("pools", &self.pools.keys())
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<N: Network> SyncEngine<N> {
    pub fn new(config: SyncConfig, store: Arc<dyn CheckpointStore>) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            config,
            pools: HashMap::new(),
            store,
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        })
    }

    /// Registers the RPC pool serving `network`.
    #[must_use]
    pub fn with_pool(mut self, network: impl Into<String>, pool: RpcClientPool<N>) -> Self {
        self.pools.insert(network.into(), pool);
        self
    }

    /// Starts a worker for `subscription` and returns its event stream.
    pub fn spawn(
        &mut self,
        subscription: Subscription,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ReceiverStream<WorkerEvent>, SyncError> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::ServiceShutdown);
        }
        if let (Some(start), Some(end)) = (subscription.start_block, subscription.end_block)
            && end < start
        {
            return Err(SyncError::InvalidConfig(format!(
                "subscription {}: end block {end} precedes start block {start}",
                subscription.id
            )));
        }
        let pool = self.pools.get(&subscription.network).cloned().ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "subscription {}: no pool for network {}",
                subscription.id, subscription.network
            ))
        })?;

        let (sender, receiver) = mpsc::channel(MAX_BUFFERED_EVENTS);
        info!(subscription = %subscription.id, network = %subscription.network, "Starting worker");

        let worker = SyncWorker {
            planner: RangePlanner::new(self.config.max_block_span),
            fetcher: LogFetcher::new(pool.clone()),
            detector: ReorgDetector::new(pool.clone(), self.config.reorg_lookback),
            dispatcher: EventDispatcher::new(
                subscription.id.clone(),
                handler,
                Arc::clone(&self.store),
                self.config.dispatch_attempts,
                self.config.dispatch_retry_delay,
            ),
            pool,
            store: Arc::clone(&self.store),
            config: self.config,
            shutdown: self.shutdown.clone(),
            cursor: None,
            subscription,
        };
        self.workers.push(tokio::spawn(worker.run(sender)));

        Ok(ReceiverStream::new(receiver))
    }

    /// Cancels all workers and waits for each to finish its in-flight range.
    pub async fn shutdown(mut self) {
        info!(workers = self.workers.len(), "Engine shutting down");
        self.shutdown.cancel();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                error!(error = %err, "Worker task failed during shutdown");
            }
        }
    }
}

/// One subscription's sync loop: backfill, then poll live, reconciling reorgs.
struct SyncWorker<N: Network> {
    subscription: Subscription,
    pool: RpcClientPool<N>,
    planner: RangePlanner,
    fetcher: LogFetcher<N>,
    detector: ReorgDetector<N>,
    dispatcher: EventDispatcher,
    store: Arc<dyn CheckpointStore>,
    config: SyncConfig,
    shutdown: CancellationToken,
    cursor: Option<Checkpoint>,
}

impl<N: Network> SyncWorker<N> {
    async fn run(mut self, events: mpsc::Sender<WorkerEvent>) {
        if let Err(err) = self.sync(&events).await {
            error!(subscription = %self.subscription.id, error = %err, "Subscription halted");
            events.try_stream(WorkerEvent::SubscriptionHalted(err)).await;
        }
    }

    async fn sync(&mut self, events: &mpsc::Sender<WorkerEvent>) -> Result<(), SyncError> {
        self.cursor = self.store.load(&self.subscription.id).await?;
        match &self.cursor {
            Some(checkpoint) => {
                info!(subscription = %self.subscription.id, checkpoint = %checkpoint, "Resuming");
                self.detector.record(checkpoint.number, checkpoint.hash);
            }
            None => info!(subscription = %self.subscription.id, "No checkpoint, starting fresh"),
        }
        self.dispatcher.restore().await?;

        let head = self.pool.get_block_number().await?;
        let target = self.subscription.end_block.map_or(head, |end| end.min(head));
        if !self.advance_to(target, events).await? {
            return Ok(());
        }
        if self.completed() {
            events.try_stream(WorkerEvent::BackfillCompleted).await;
            return Ok(());
        }

        if !events.try_stream(WorkerEvent::SwitchedToLive).await {
            return Ok(());
        }
        info!(subscription = %self.subscription.id, head, "Backfill caught up, going live");

        let mut poller = LivePoller::new(self.config.poll_interval);
        poller.tick().await; // consume the immediate first tick
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(subscription = %self.subscription.id, "Worker stopped");
                    return Ok(());
                }
                () = poller.tick() => {
                    if !self.live_tick(events).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One poll cycle: verify the checkpoint, roll back on a reorg, then close any gap to the
    /// head. Returns `false` when the worker should stop.
    async fn live_tick(&mut self, events: &mpsc::Sender<WorkerEvent>) -> Result<bool, SyncError> {
        if let Some(cursor) = self.cursor
            && let Some(reorg) = self.detector.check(&cursor).await?
        {
            let ancestor = reorg.common_ancestor;
            self.dispatcher.rollback(ancestor.number).await?;
            self.store
                .compare_and_swap(&self.subscription.id, Some(&cursor), &ancestor)
                .await?;
            self.cursor = Some(ancestor);
            self.detector.resolve(&ancestor);
            if !events.try_stream(WorkerEvent::ReorgDetected(reorg)).await {
                return Ok(false);
            }
        }

        let head = self.pool.get_block_number().await?;
        let target = self.subscription.end_block.map_or(head, |end| end.min(head));

        if let Some(cursor) = self.cursor {
            match catch_up_range(cursor.number, target) {
                Some(gap) => {
                    debug!(subscription = %self.subscription.id, gap = ?gap, "Head advanced")
                }
                None => return Ok(true),
            }
        }

        if !self.advance_to(target, events).await? {
            return Ok(false);
        }
        if self.completed() {
            events.try_stream(WorkerEvent::BackfillCompleted).await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Processes planner ranges from the cursor up to `target`. Returns `false` when the
    /// worker should stop (shutdown requested or the event stream was dropped).
    async fn advance_to(
        &mut self,
        target: u64,
        events: &mpsc::Sender<WorkerEvent>,
    ) -> Result<bool, SyncError> {
        let ranges = self.planner.plan(
            self.cursor.map(|c| c.number),
            self.subscription.start_block,
            target,
        );

        for range in ranges {
            if self.shutdown.is_cancelled() {
                return Ok(false);
            }

            let (records, end_hash) =
                self.fetcher.fetch_anchored(range.clone(), &self.subscription).await?;
            let outcome = self.dispatcher.dispatch(range.clone(), records).await?;

            // checkpoint only after the handler acknowledged the batch
            let checkpoint = Checkpoint::new(*range.end(), end_hash);
            self.store
                .compare_and_swap(&self.subscription.id, self.cursor.as_ref(), &checkpoint)
                .await?;
            self.cursor = Some(checkpoint);
            self.detector.record(checkpoint.number, checkpoint.hash);
            self.dispatcher
                .prune(checkpoint.number.saturating_sub(self.config.reorg_lookback))
                .await?;

            debug!(
                subscription = %self.subscription.id,
                checkpoint = %checkpoint,
                delivered = outcome.delivered,
                deduplicated = outcome.deduplicated,
                "Range processed"
            );
            if !events.try_stream(WorkerEvent::CheckpointAdvanced(checkpoint)).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether a bounded subscription has reached its end block.
    fn completed(&self) -> bool {
        match self.subscription.end_block {
            Some(end) => self.cursor.is_some_and(|c| c.number >= end),
            None => false,
        }
    }
}
