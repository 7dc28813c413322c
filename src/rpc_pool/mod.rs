//! Rate-limited, health-aware access to a network's RPC endpoints.

mod endpoint;
mod pool;
mod rate_limiter;

pub use endpoint::EndpointHealth;
pub use pool::RpcClientPool;
