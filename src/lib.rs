//! Historical and live synchronization of EVM event logs.
//!
//! `logsync` keeps downstream consumers in step with the chain: each registered
//! [`Subscription`] is backfilled from its start block in bounded `eth_getLogs` ranges, then
//! followed live by polling the chain head. Records are delivered to an [`EventHandler`]
//! ordered by `(block_number, log_index)` and deduplicated, progress is persisted through a
//! compare-and-swap [`CheckpointStore`] only after the handler acknowledges a batch, and
//! reorgs are detected and rolled back to the common ancestor automatically.
//!
//! RPC access goes through a [`RpcClientPool`] that paces requests per endpoint, retries with
//! exponential backoff and fails over between endpoints, so provider hiccups stay invisible
//! to handlers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alloy::primitives::b256;
//! use logsync::{
//!     EndpointConfig, EventSignature, InMemoryCheckpointStore, RetryConfig, RpcClientPool,
//!     Subscription, SyncConfig, SyncEngine,
//! };
//! use tokio_stream::StreamExt;
//!
//! # async fn example(handler: Arc<dyn logsync::EventHandler>) -> Result<(), Box<dyn std::error::Error>> {
//! let pool: RpcClientPool = RpcClientPool::connect(
//!     "mainnet",
//!     &[EndpointConfig::new("primary", "https://eth.example.com").requests_per_second(25)],
//!     RetryConfig::default(),
//! )?;
//!
//! let store = Arc::new(InMemoryCheckpointStore::new());
//! let mut engine = SyncEngine::new(SyncConfig::default(), store)?.with_pool("mainnet", pool);
//!
//! let transfer = EventSignature::new(
//!     "Transfer",
//!     b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"),
//! );
//! let subscription = Subscription::new(
//!     "usdc-transfers",
//!     "mainnet",
//!     vec!["0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse()?],
//!     vec![transfer],
//! )
//! .start_block(6_082_465);
//!
//! let mut events = engine.spawn(subscription, handler)?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
mod error;
pub mod fetcher;
pub mod handler;
pub mod planner;
pub mod poller;
pub mod reorg;
pub mod rpc_pool;
pub mod store;
pub mod subscription;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{EndpointConfig, RetryConfig, SyncConfig};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use engine::{SyncEngine, WorkerEvent};
pub use error::SyncError;
pub use fetcher::LogFetcher;
pub use handler::{CommitToken, EventHandler, HandlerError};
pub use planner::{RangeIterator, RangePlanner};
pub use poller::LivePoller;
pub use reorg::{ReorgDetector, ReorgState};
pub use rpc_pool::{EndpointHealth, RpcClientPool};
pub use store::{CheckpointStore, InMemoryCheckpointStore, StoreError};
pub use subscription::{EventSignature, Subscription};
pub use types::{BlockNumber, Checkpoint, DedupKey, LogRecord, ReorgEvent};
