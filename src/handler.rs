use std::{fmt, ops::RangeInclusive};

use alloy::primitives::BlockNumber;
use async_trait::async_trait;
use thiserror::Error;

use crate::types::LogRecord;

/// Error returned by a handler to signal that a batch was not consumed.
///
/// The dispatcher retries the same batch up to its configured attempt limit before halting the
/// subscription with [`SyncError::DeliveryFailed`](crate::SyncError::DeliveryFailed).
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Identifies the batch a delivery belongs to.
///
/// Handed to the handler alongside the records; returning `Ok` from
/// [`EventHandler::on_batch`] commits the batch and lets the subscription's checkpoint advance
/// past `range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitToken {
    pub subscription_id: String,
    pub range: RangeInclusive<BlockNumber>,
}

impl fmt::Display for CommitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@[{}, {}]", self.subscription_id, self.range.start(), self.range.end())
    }
}

/// Downstream consumer of decoded log records.
///
/// Handlers are registered per subscription at configuration-load time; dynamic dispatch keeps
/// the engine agnostic of whether a handler is native code or a declarative rule evaluator.
///
/// Delivery semantics: the engine guarantees that no two calls ever contain records sharing a
/// [`DedupKey`](crate::DedupKey), and that batches arrive ordered by `(block_number,
/// log_index)`. Acknowledged keys are persisted through the
/// [`CheckpointStore`](crate::CheckpointStore) delivery ledger, so the guarantee holds across
/// restarts. The one residual window is a crash between the acknowledgement and the ledger
/// write, which re-delivers that single batch; handler side effects keyed by the dedup key
/// stay exactly-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_batch(&self, records: &[LogRecord], token: &CommitToken)
    -> Result<(), HandlerError>;
}
