use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use alloy::{
    network::{Ethereum, Network},
    providers::RootProvider,
};
use tracing::{info, warn};

use crate::{config::EndpointConfig, rpc_pool::rate_limiter::RateLimiter};

/// Health of an upstream endpoint, updated on every request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointHealth {
    Healthy,
    /// Recently failed calls; deprioritized but still tried.
    Degraded,
    /// Connection-level failures; tried last.
    Unreachable,
}

impl EndpointHealth {
    /// Selection order: lower ranks are preferred.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unreachable => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Healthy,
            1 => Self::Degraded,
            _ => Self::Unreachable,
        }
    }
}

/// One upstream provider plus its rate budget and health bookkeeping.
#[derive(Debug)]
pub(crate) struct Endpoint<N: Network = Ethereum> {
    pub(crate) id: String,
    pub(crate) provider: RootProvider<N>,
    pub(crate) limiter: RateLimiter,
    health: AtomicU8,
    in_flight: AtomicUsize,
}

impl<N: Network> Endpoint<N> {
    pub(crate) fn new(config: &EndpointConfig, provider: RootProvider<N>) -> Self {
        Self {
            id: config.id.clone(),
            provider,
            limiter: RateLimiter::new(config.requests_per_second, config.max_concurrent),
            health: AtomicU8::new(EndpointHealth::Healthy.rank()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn health(&self) -> EndpointHealth {
        EndpointHealth::from_raw(self.health.load(Ordering::Relaxed))
    }

    pub(crate) fn mark(&self, health: EndpointHealth) {
        let previous =
            EndpointHealth::from_raw(self.health.swap(health.rank(), Ordering::Relaxed));
        if previous != health {
            match health {
                EndpointHealth::Healthy => {
                    info!(endpoint = %self.id, "Endpoint recovered")
                }
                EndpointHealth::Degraded | EndpointHealth::Unreachable => {
                    warn!(endpoint = %self.id, health = ?health, "Endpoint health downgraded")
                }
            }
        }
    }

    /// Downgrades health one step after a connection-dead outcome.
    ///
    /// A single timeout leaves the endpoint degraded (and deprioritized); only repeated
    /// timeouts without an intervening success mark it unreachable.
    pub(crate) fn mark_unresponsive(&self) {
        let next = match self.health() {
            EndpointHealth::Healthy => EndpointHealth::Degraded,
            EndpointHealth::Degraded | EndpointHealth::Unreachable => EndpointHealth::Unreachable,
        };
        self.mark(next);
    }

    /// Current number of in-flight requests, used as the load tiebreaker.
    pub(crate) fn load(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub(crate) fn track_in_flight(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { counter: &self.in_flight }
    }
}

pub(crate) struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
