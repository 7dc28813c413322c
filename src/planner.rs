use std::ops::RangeInclusive;

use crate::types::BlockNumber;

/// Splits a block interval into bounded chunks for `eth_getLogs`.
///
/// The plan is lazy: chunks are produced on demand, so a consumer that stops early (shutdown,
/// fatal error) never pays for the rest of the interval. After a reorg the consumer calls
/// [`RangeIterator::reset_to`] and iteration restarts from the rollback point.
#[derive(Debug, Clone)]
pub struct RangePlanner {
    max_span: u64,
}

impl RangePlanner {
    /// # Panics
    /// Panics if `max_span` is zero.
    #[must_use]
    pub fn new(max_span: u64) -> Self {
        assert!(max_span >= 1, "max_span must be at least 1");
        Self { max_span }
    }

    /// Plans the chunks needed to move a subscription from its current position to `end`.
    ///
    /// The first block is derived with this precedence: one past the persisted `cursor` when a
    /// checkpoint exists, otherwise the subscription's configured `start_block`, otherwise
    /// genesis. An already-caught-up subscription yields an empty plan rather than an error.
    #[must_use]
    pub fn plan(
        &self,
        cursor: Option<BlockNumber>,
        start_block: Option<BlockNumber>,
        end: BlockNumber,
    ) -> RangeIterator {
        let start = match cursor {
            Some(c) => c.saturating_add(1),
            None => start_block.unwrap_or(0),
        };
        RangeIterator::new(start, end, self.max_span)
    }
}

/// Iterator over consecutive inclusive block ranges of at most `range_size` blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeIterator {
    current: BlockNumber,
    end: BlockNumber,
    range_size: u64,
    exhausted: bool,
}

impl RangeIterator {
    /// # Panics
    /// Panics if `range_size` is zero.
    #[must_use]
    pub(crate) fn new(start: BlockNumber, end: BlockNumber, range_size: u64) -> Self {
        assert!(range_size >= 1, "range_size must be at least 1");
        Self { current: start, end, range_size, exhausted: start > end }
    }

    /// Restarts iteration from `block`, keeping the original upper bound.
    ///
    /// Used after a reorg rollback: the next yielded range begins at `block`.
    pub fn reset_to(&mut self, block: BlockNumber) {
        self.current = block;
        self.exhausted = block > self.end;
    }

    /// Number of ranges left, accounting for the chunk size.
    fn remaining(&self) -> u64 {
        if self.exhausted {
            return 0;
        }
        let blocks = self.end - self.current + 1;
        blocks.div_ceil(self.range_size)
    }
}

impl Iterator for RangeIterator {
    type Item = RangeInclusive<BlockNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let start = self.current;
        let end = start.saturating_add(self.range_size - 1).min(self.end);

        if end == self.end {
            self.exhausted = true;
        } else {
            self.current = end + 1;
        }

        Some(start..=end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).ok();
        (remaining.unwrap_or(usize::MAX), remaining)
    }
}
