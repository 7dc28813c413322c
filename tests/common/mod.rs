//! Fixtures shared by the integration tests.
#![allow(dead_code)] // not every test binary uses every fixture

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use alloy::{
    consensus::Header,
    primitives::{Address, B256, Bytes, LogData, b256},
    providers::{RootProvider, mock::Asserter},
    rpc::{
        client::RpcClient,
        types::{Block, BlockTransactions, Log},
    },
};
use async_trait::async_trait;
use logsync::{
    CommitToken, EndpointConfig, EventHandler, EventSignature, HandlerError, LogRecord,
    RetryConfig, RpcClientPool, Subscription,
};
use tokio::sync::Mutex;

/// `keccak256("Transfer(address,address,uint256)")`
pub const TOPIC_TRANSFER: B256 =
    b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn subscription(id: &str) -> Subscription {
    Subscription::new(
        id,
        "testnet",
        vec![Address::repeat_byte(0x11)],
        vec![EventSignature::new("Transfer", TOPIC_TRANSFER)],
    )
}

pub fn hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

pub fn log(block_number: u64, log_index: u64) -> Log {
    log_in(block_number, hash(block_number as u8), log_index)
}

/// A log with an explicit block hash, for post-reorg replacement blocks.
pub fn log_in(block_number: u64, block_hash: B256, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: Address::repeat_byte(0x11),
            data: LogData::new_unchecked(vec![TOPIC_TRANSFER], Bytes::new()),
        },
        block_hash: Some(block_hash),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(B256::with_last_byte(block_number as u8)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

pub fn block(number: u64, block_hash: B256) -> Block {
    let header = alloy::rpc::types::Header {
        hash: block_hash,
        inner: Header { number, parent_hash: hash(number.wrapping_sub(1) as u8), ..Default::default() },
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

/// Pool over a mocked transport with retries disabled, so every pushed response is consumed
/// by exactly one call.
pub fn mocked_pool(asserter: &Asserter) -> RpcClientPool {
    let retry = RetryConfig::default()
        .max_retries(0)
        .base_delay(Duration::from_millis(1))
        .call_timeout(Duration::from_secs(5));

    RpcClientPool::from_providers(
        "testnet",
        vec![(
            EndpointConfig::new("mock", "http://localhost:8545").requests_per_second(100_000),
            RootProvider::new(RpcClient::mocked(asserter.clone())),
        )],
        retry,
    )
    .expect("mocked pool")
}

/// Handler that records every delivered batch, optionally failing the first N calls.
pub struct RecordingHandler {
    pub batches: Mutex<Vec<(CommitToken, Vec<LogRecord>)>>,
    fail_first: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self { batches: Mutex::new(Vec::new()), fail_first: AtomicUsize::new(0) }
    }

    pub fn failing_first(n: usize) -> Self {
        Self { batches: Mutex::new(Vec::new()), fail_first: AtomicUsize::new(n) }
    }

    /// All delivered records, flattened in delivery order.
    pub async fn records(&self) -> Vec<LogRecord> {
        self.batches.lock().await.iter().flat_map(|(_, records)| records.clone()).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_batch(
        &self,
        records: &[LogRecord],
        token: &CommitToken,
    ) -> Result<(), HandlerError> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HandlerError::new("simulated handler failure"));
        }
        self.batches.lock().await.push((token.clone(), records.to_vec()));
        Ok(())
    }
}
