use std::collections::VecDeque;

use alloy::primitives::{B256, BlockNumber};

/// Fixed-capacity history of `(block number, hash)` pairs the detector has confirmed.
///
/// The capacity is the reorg lookback: once full, recording a new block evicts the oldest,
/// and a reorg deeper than the history is irreconcilable.
#[derive(Debug)]
pub(crate) struct BlockHashHistory {
    buffer: VecDeque<(BlockNumber, B256)>,
    capacity: usize,
}

impl BlockHashHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        Self { buffer: VecDeque::with_capacity(capacity), capacity }
    }

    /// Records a confirmed block, evicting the oldest entry when full.
    ///
    /// Out-of-order records are ignored; the history only ever extends forward.
    pub(crate) fn record(&mut self, number: BlockNumber, hash: B256) {
        if let Some((newest, _)) = self.buffer.back()
            && number <= *newest
        {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back((number, hash));
    }

    /// Entries newest first, the natural walk order when hunting for a common ancestor.
    pub(crate) fn iter_newest_first(&self) -> impl Iterator<Item = (BlockNumber, B256)> + '_ {
        self.buffer.iter().rev().copied()
    }

    /// Drops every entry above `number` after a rollback.
    pub(crate) fn rollback_to(&mut self, number: BlockNumber) {
        while let Some((newest, _)) = self.buffer.back() {
            if *newest <= number {
                break;
            }
            self.buffer.pop_back();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }
}
