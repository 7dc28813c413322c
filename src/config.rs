//! Resolved configuration consumed by the engine.
//!
//! The engine never parses manifests; it is handed these structs by the embedding application.
//! Missing start/end bounds on a subscription are a defined default (genesis / live
//! indefinitely), never an error.

use std::time::Duration;

/// Maximum block span per `getLogs` query.
pub const DEFAULT_MAX_BLOCK_SPAN: u64 = 1000;

/// How far back the reorg detector is willing to walk before giving up.
///
/// After this many confirmations a block is treated as effectively final on Ethereum mainnet.
pub const DEFAULT_REORG_LOOKBACK: u64 = 64;

/// Interval between chain-head polls once a subscription is live.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Retry attempts per endpoint before failing over.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Base delay for exponential backoff between retries.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap on the exponential backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Timeout applied to each individual RPC call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery attempts per batch before a subscription halts with `DeliveryFailed`.
pub const DEFAULT_DISPATCH_ATTEMPTS: usize = 3;

/// Delay between delivery attempts of the same batch.
pub const DEFAULT_DISPATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default per-endpoint rate budget.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

/// Default per-endpoint in-flight request cap.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

/// Capacity of each worker's outbound event channel.
pub const MAX_BUFFERED_EVENTS: usize = 1024;

/// A single upstream RPC endpoint and its rate budget.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub id: String,
    pub url: String,
    pub requests_per_second: u32,
    pub max_concurrent: usize,
}

impl EndpointConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_concurrent: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    #[must_use]
    pub fn requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

/// Retry, backoff and timeout settings shared by all calls through a pool.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Engine-wide sync parameters.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Maximum span of a single `getLogs` range.
    pub max_block_span: u64,
    /// Chain-head poll interval once live.
    pub poll_interval: Duration,
    /// Reorg lookback window, in blocks.
    pub reorg_lookback: u64,
    /// Delivery attempts per batch.
    pub dispatch_attempts: usize,
    /// Delay between delivery attempts.
    pub dispatch_retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_block_span: DEFAULT_MAX_BLOCK_SPAN,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reorg_lookback: DEFAULT_REORG_LOOKBACK,
            dispatch_attempts: DEFAULT_DISPATCH_ATTEMPTS,
            dispatch_retry_delay: DEFAULT_DISPATCH_RETRY_DELAY,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn max_block_span(mut self, max_block_span: u64) -> Self {
        self.max_block_span = max_block_span;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn reorg_lookback(mut self, reorg_lookback: u64) -> Self {
        self.reorg_lookback = reorg_lookback;
        self
    }

    #[must_use]
    pub fn dispatch_attempts(mut self, dispatch_attempts: usize) -> Self {
        self.dispatch_attempts = dispatch_attempts;
        self
    }

    #[must_use]
    pub fn dispatch_retry_delay(mut self, dispatch_retry_delay: Duration) -> Self {
        self.dispatch_retry_delay = dispatch_retry_delay;
        self
    }

    /// Rejects configurations the engine cannot run with.
    pub(crate) fn validate(&self) -> Result<(), crate::SyncError> {
        if self.max_block_span == 0 {
            return Err(crate::SyncError::InvalidConfig(
                "max_block_span must be greater than 0".into(),
            ));
        }
        if self.dispatch_attempts == 0 {
            return Err(crate::SyncError::InvalidConfig(
                "dispatch_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
