//! Shared fixtures for unit tests: canned logs, blocks and mocked pools.

use alloy::{
    consensus::Header,
    primitives::{Address, B256, Bytes, LogData, b256},
    providers::{RootProvider, mock::Asserter},
    rpc::{
        client::RpcClient,
        types::{Block, BlockTransactions, Log},
    },
};
use std::time::Duration;

use crate::{
    config::{EndpointConfig, RetryConfig},
    rpc_pool::RpcClientPool,
    subscription::{EventSignature, Subscription},
};

/// `keccak256("Transfer(address,address,uint256)")`
pub(crate) const TOPIC_TRANSFER: B256 =
    b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

pub(crate) fn subscription() -> Subscription {
    Subscription::new(
        "sub-transfers",
        "testnet",
        vec![Address::repeat_byte(0x11)],
        vec![EventSignature::new("Transfer", TOPIC_TRANSFER)],
    )
}

/// A minimal RPC log carrying full block metadata.
pub(crate) fn log(
    block_number: u64,
    block_hash: B256,
    transaction_hash: B256,
    log_index: u64,
    topic0: B256,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: Address::repeat_byte(0x11),
            data: LogData::new_unchecked(vec![topic0], Bytes::new()),
        },
        block_hash: Some(block_hash),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(transaction_hash),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

/// An empty block with the header fields the engine inspects.
pub(crate) fn block(number: u64, hash: B256, parent_hash: B256) -> Block {
    let header = alloy::rpc::types::Header {
        hash,
        inner: Header { number, parent_hash, ..Default::default() },
        total_difficulty: None,
        size: None,
    };
    Block {
        header,
        uncles: Vec::new(),
        transactions: BlockTransactions::Hashes(Vec::new()),
        withdrawals: None,
    }
}

/// Single-endpoint pool over a mocked transport, with retries disabled so every pushed
/// response is consumed by exactly one call.
pub(crate) fn mocked_pool(asserter: &Asserter) -> RpcClientPool {
    let retry = RetryConfig::default()
        .max_retries(0)
        .base_delay(Duration::from_millis(1))
        .call_timeout(Duration::from_secs(5));

    RpcClientPool::from_providers(
        "testnet",
        vec![(
            EndpointConfig::new("mock", "http://localhost:8545").requests_per_second(1000),
            RootProvider::new(RpcClient::mocked(asserter.clone())),
        )],
        retry,
    )
    .expect("mocked pool")
}
