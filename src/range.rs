use std::ops::RangeInclusive;

use alloy::primitives::BlockNumber;
use tracing::debug;

/// Yields consecutive block ranges of at most `max_block_range` blocks, oldest first.
#[derive(Debug, Clone)]
pub struct RangeIterator {
    current: BlockNumber,
    end: BlockNumber,
    range_size: u64,
    batch_count: u64,
    total_batches: u64,
}

impl RangeIterator {
    /// Creates an iterator covering `start..=end`. Yields nothing when `start > end`.
    ///
    /// # Panics
    ///
    /// Panics if `max_block_range` is 0.
    #[must_use]
    pub const fn new(start: BlockNumber, end: BlockNumber, max_block_range: u64) -> Self {
        assert!(max_block_range >= 1, "max_block_range must be at least 1");
        let total_batches = if start > end { 0 } else { (end - start) / max_block_range + 1 };
        Self { current: start, end, range_size: max_block_range, batch_count: 0, total_batches }
    }

    /// Returns the number of batches yielded so far.
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }
}

impl Iterator for RangeIterator {
    type Item = RangeInclusive<BlockNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_count >= self.total_batches {
            return None;
        }

        self.batch_count += 1;
        if self.batch_count % 10 == 0 {
            debug!(batch_count = self.batch_count, "Processed batches");
        }

        let batch_start = self.current;
        let batch_end = batch_start.saturating_add(self.range_size - 1).min(self.end);
        self.current = batch_end.saturating_add(1);

        Some(batch_start..=batch_end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.total_batches - self.batch_count) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}
