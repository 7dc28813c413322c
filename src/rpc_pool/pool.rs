use std::{sync::Arc, time::Duration};

use alloy::{
    eips::BlockNumberOrTag,
    network::{BlockResponse, Ethereum, Network, primitives::HeaderResponse},
    primitives::{B256, BlockNumber},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::{
    SyncError,
    config::{EndpointConfig, RetryConfig},
    error::classify,
    rpc_pool::endpoint::{Endpoint, EndpointHealth},
};

/// Rate-limited, health-aware pool of RPC endpoints for one network.
///
/// Every call selects the healthiest, least-loaded endpoint, paces it through the endpoint's
/// token bucket, applies a per-call timeout and exponential backoff with jitter, and fails
/// over to the remaining endpoints before giving up with [`SyncError::ExhaustedRetries`].
///
/// The pool is cheap to clone; all clones share endpoint health and rate accounting, which is
/// the only mutable state shared between subscription workers.
#[derive(Debug)]
pub struct RpcClientPool<N: Network = Ethereum> {
    network: String,
    endpoints: Arc<Vec<Endpoint<N>>>,
    retry: RetryConfig,
}

impl<N: Network> Clone for RpcClientPool<N> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            endpoints: Arc::clone(&self.endpoints),
            retry: self.retry,
        }
    }
}

impl<N: Network> RpcClientPool<N> {
    /// Connects HTTP providers for every configured endpoint.
    pub fn connect(
        network: impl Into<String>,
        configs: &[EndpointConfig],
        retry: RetryConfig,
    ) -> Result<Self, SyncError> {
        let network = network.into();
        if configs.is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "network {network} has no endpoints configured"
            )));
        }

        let mut endpoints = Vec::with_capacity(configs.len());
        for config in configs {
            let url = config.url.parse().map_err(|e| {
                SyncError::InvalidConfig(format!("endpoint {}: invalid url: {e}", config.id))
            })?;
            endpoints.push(Endpoint::new(config, RootProvider::new_http(url)));
        }

        info!(network = %network, endpoints = endpoints.len(), "RPC client pool initialized");
        Ok(Self { network, endpoints: Arc::new(endpoints), retry })
    }

    /// Builds a pool around pre-connected providers.
    ///
    /// Used by tests and by applications that construct providers themselves.
    pub fn from_providers(
        network: impl Into<String>,
        providers: Vec<(EndpointConfig, RootProvider<N>)>,
        retry: RetryConfig,
    ) -> Result<Self, SyncError> {
        let network = network.into();
        if providers.is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "network {network} has no endpoints configured"
            )));
        }

        let endpoints = providers
            .into_iter()
            .map(|(config, provider)| Endpoint::new(&config, provider))
            .collect();

        Ok(Self { network, endpoints: Arc::new(endpoints), retry })
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Fetch logs for the given filter.
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, SyncError> {
        debug!("eth_getLogs called");
        let result = self
            .execute(move |provider| async move { provider.get_logs(filter).await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Fetch the latest block number.
    pub async fn get_block_number(&self) -> Result<u64, SyncError> {
        debug!("eth_blockNumber called");
        let result = self
            .execute(move |provider| async move { provider.get_block_number().await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_blockNumber failed");
        }
        result
    }

    /// Fetch a block by number or tag.
    pub async fn get_block_by_number(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<N::BlockResponse, SyncError> {
        debug!("eth_getBlockByNumber called");
        let result = self
            .execute(move |provider| async move { provider.get_block_by_number(number).await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getBlockByNumber failed");
        }

        result?.ok_or(SyncError::BlockNotFound(number.into()))
    }

    /// Fetch a block by hash.
    pub async fn get_block_by_hash(&self, hash: B256) -> Result<N::BlockResponse, SyncError> {
        debug!("eth_getBlockByHash called");
        let result = self
            .execute(move |provider| async move { provider.get_block_by_hash(hash).await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getBlockByHash failed");
        }

        result?.ok_or(SyncError::BlockNotFound(hash.into()))
    }

    /// Fetch the canonical hash of a block.
    pub async fn get_block_hash(&self, number: BlockNumber) -> Result<B256, SyncError> {
        let block = self.get_block_by_number(number.into()).await?;
        Ok(block.header().hash())
    }

    /// Executes `operation` against the pool with pacing, retries and failover.
    ///
    /// [`SyncError::RangeTooLarge`] is returned to the caller immediately: the endpoint
    /// answered, the request was simply too big, and switching endpoints would not help.
    pub(crate) async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, SyncError>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let mut order: Vec<&Endpoint<N>> = self.endpoints.iter().collect();
        order.sort_by_key(|e| (e.health().rank(), e.load()));

        for endpoint in order {
            match self.try_endpoint(endpoint, &operation).await {
                Ok(value) => {
                    endpoint.mark(EndpointHealth::Healthy);
                    return Ok(value);
                }
                Err(e @ SyncError::RangeTooLarge(_)) => return Err(e),
                Err(e) => {
                    match &e {
                        SyncError::Timeout => endpoint.mark_unresponsive(),
                        _ => endpoint.mark(EndpointHealth::Degraded),
                    }
                    error!(
                        network = %self.network,
                        endpoint = %endpoint.id,
                        error = %e,
                        "Endpoint failed after retries, failing over"
                    );
                }
            }
        }

        error!(network = %self.network, "All endpoints exhausted");
        if self.endpoints.iter().all(|e| e.health() == EndpointHealth::Unreachable) {
            return Err(SyncError::EndpointUnreachable(self.network.clone()));
        }
        Err(SyncError::ExhaustedRetries)
    }

    /// Runs the operation on one endpoint: pace, per-call timeout, exponential backoff.
    async fn try_endpoint<T, F, Fut>(
        &self,
        endpoint: &Endpoint<N>,
        operation: &F,
    ) -> Result<T, SyncError>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.retry.max_retries)
            .with_min_delay(self.retry.base_delay)
            .with_max_delay(self.retry.max_delay)
            .with_jitter();

        let attempt = || async {
            let _permit = endpoint.limiter.acquire().await;
            let _in_flight = endpoint.track_in_flight();

            match timeout(self.retry.call_timeout, operation(endpoint.provider.clone())).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(rpc_err)) => Err(classify(rpc_err)),
                Err(_) => Err(SyncError::Timeout),
            }
        };

        attempt
            .retry(retry_strategy)
            .when(SyncError::is_retryable)
            .notify(|err: &SyncError, dur: Duration| {
                info!(endpoint = %endpoint.id, error = %err, "RPC error, retrying after {:?}", dur);
            })
            .sleep(tokio::time::sleep)
            .await
    }
}
