use std::sync::Arc;

use alloy::{
    eips::BlockId,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

use crate::{handler::HandlerError, store::StoreError};

/// Errors produced by the sync engine.
///
/// `SyncError` values are returned by engine entry points and are also surfaced on a worker's
/// event stream via [`WorkerEvent::SubscriptionHalted`](crate::engine::WorkerEvent).
///
/// Retryable variants ([`SyncError::RateLimited`], [`SyncError::Timeout`], [`SyncError::Rpc`])
/// are handled inside the RPC pool's backoff loop and only escape it as
/// [`SyncError::ExhaustedRetries`]. [`SyncError::RangeTooLarge`] is recovered by range
/// subdivision in the fetcher and never reaches callers of
/// [`LogFetcher::fetch`](crate::fetcher::LogFetcher::fetch). The remaining variants are fatal
/// for the affected subscription but never crash unrelated workers.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The underlying RPC transport returned an error that is neither rate limiting nor an
    /// oversized-range rejection.
    #[error("RPC error: {0}")]
    Rpc(#[source] Arc<RpcError<TransportErrorKind>>),

    /// The endpoint rejected the request due to rate limiting.
    #[error("endpoint rate limited the request: {0}")]
    RateLimited(#[source] Arc<RpcError<TransportErrorKind>>),

    /// The provider rejected a `getLogs` query because the requested block range exceeds its
    /// span or result-size limits.
    #[error("provider rejected block range as too large: {0}")]
    RangeTooLarge(#[source] Arc<RpcError<TransportErrorKind>>),

    /// A single RPC call exceeded the configured per-call timeout.
    #[error("RPC call timed out")]
    Timeout,

    /// A requested block could not be retrieved.
    #[error("block not found, block id: {0}")]
    BlockNotFound(BlockId),

    /// Every endpoint of the network failed the call after exhausting its retry budget.
    #[error("all endpoints exhausted after retries")]
    ExhaustedRetries,

    /// No endpoint for the network is currently reachable.
    #[error("no reachable endpoint for network {0}")]
    EndpointUnreachable(String),

    /// Fetching a range failed even after planner-driven subdivision and RPC retries.
    #[error("failed to fetch logs for range [{from}, {to}]")]
    FetchFailed {
        from: u64,
        to: u64,
        #[source]
        source: Arc<SyncError>,
    },

    /// The chain kept reorganizing while a range was being fetched, so no consistent snapshot
    /// of the range could be anchored to an end-block hash.
    #[error("could not fetch a consistent snapshot of range [{from}, {to}]")]
    InconsistentRange { from: u64, to: u64 },

    /// A reorg walked back further than the configured lookback window without finding a
    /// common ancestor. Requires operator intervention.
    #[error("reorg exceeds the configured lookback of {lookback} blocks")]
    IrreconcilableReorg { lookback: u64 },

    /// The handler kept failing the same batch. The subscription's cursor stops advancing
    /// until an operator clears the condition; no events are dropped.
    #[error("handler delivery failed after {attempts} attempts")]
    DeliveryFailed {
        attempts: usize,
        #[source]
        source: HandlerError,
    },

    /// The checkpoint store rejected or failed an operation.
    #[error("checkpoint store error")]
    Store(#[from] StoreError),

    /// The engine was given an unusable configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine is shutting down and no longer accepts work.
    #[error("service is shutting down")]
    ServiceShutdown,
}

impl SyncError {
    /// Whether the RPC pool should retry the call on the same endpoint.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::RateLimited(_) | Self::Timeout)
    }
}

impl From<RpcError<TransportErrorKind>> for SyncError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        classify(error)
    }
}

/// Maps a raw transport error onto the engine taxonomy.
///
/// Providers do not agree on error codes for rate limiting or oversized ranges, so this falls
/// back to message sniffing. The phrasings below cover the major hosted providers; anything
/// unrecognized is treated as a plain transport error and handled by retry/failover.
pub(crate) fn classify(error: RpcError<TransportErrorKind>) -> SyncError {
    if let Some(payload) = error.as_error_resp() {
        let message = payload.message.to_lowercase();

        if payload.code == 429
            || message.contains("rate limit")
            || message.contains("too many requests")
            || message.contains("quota exceeded")
            || message.contains("request limit")
        {
            return SyncError::RateLimited(Arc::new(error));
        }

        if message.contains("block range")
            || message.contains("range is too large")
            || message.contains("query returned more than")
            || message.contains("response size exceeded")
            || message.contains("exceeds the range")
        {
            return SyncError::RangeTooLarge(Arc::new(error));
        }
    }

    SyncError::Rpc(Arc::new(error))
}
