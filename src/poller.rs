use std::{ops::RangeInclusive, time::Duration};

use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::types::BlockNumber;

/// Drives the live phase of a subscription at a fixed cadence.
///
/// Polling is deliberately stateless about chain contents: each tick the worker asks for the
/// head and processes whatever gap opened since the checkpoint, so a slow handler or a paused
/// process naturally catches up over the following ticks instead of skipping blocks.
#[derive(Debug)]
pub struct LivePoller {
    interval: Interval,
}

impl LivePoller {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        let mut interval = interval(poll_interval);
        // a delayed tick must not cause a burst of compensating ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Completes when the next poll is due. The first call completes immediately.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// The block gap a live tick must process, if any.
///
/// `None` means the subscription is caught up, including the case where the observed head is
/// behind the checkpoint (a lagging provider after failover).
#[must_use]
pub(crate) fn catch_up_range(
    last_processed: BlockNumber,
    head: BlockNumber,
) -> Option<RangeInclusive<BlockNumber>> {
    if head <= last_processed {
        return None;
    }
    Some(last_processed + 1..=head)
}
