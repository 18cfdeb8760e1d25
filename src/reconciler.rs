use alloy::primitives::Address;
use tracing::{debug, info, warn};

use crate::{
    IngestError, Position, RawLogEntry, range::RangeIterator, remote::RemoteLink,
};

/// Default maximum number of blocks covered by one log query.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1000;

/// Backfills the logs between a resume position and the current head.
#[derive(Copy, Clone, Debug)]
pub struct GapReconciler {
    max_block_range: u64,
}

impl Default for GapReconciler {
    fn default() -> Self {
        Self { max_block_range: DEFAULT_MAX_BLOCK_RANGE }
    }
}

impl GapReconciler {
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidMaxBlockRange`] if `max_block_range` is 0.
    pub fn new(max_block_range: u64) -> Result<Self, IngestError> {
        if max_block_range == 0 {
            return Err(IngestError::InvalidMaxBlockRange);
        }
        Ok(Self { max_block_range })
    }

    #[must_use]
    pub fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    /// Fetches every log of `address` from the block of `from` up to the current head, in
    /// ascending position order.
    ///
    /// The query is block-granular: logs earlier than `from` inside the same block are returned
    /// too. Logs without a position are skipped. An empty result means the head is behind
    /// `from` or nothing was emitted.
    ///
    /// # Errors
    ///
    /// * [`IngestError::ReconciliationUnavailable`] if any chunk was answered with `null`.
    /// * Any transport error raised while reading the head or querying logs.
    pub async fn reconcile<L: RemoteLink>(
        &self,
        link: &L,
        from: Position,
        address: Address,
    ) -> Result<Vec<RawLogEntry>, IngestError> {
        let head = link.block_number().await?;
        if from.block_number > head {
            debug!(%from, head, "Resume position is ahead of the head, nothing to reconcile");
            return Ok(Vec::new());
        }

        info!(%from, head, %address, "Reconciling");

        let mut entries = Vec::new();
        for blocks in RangeIterator::new(from.block_number, head, self.max_block_range) {
            let Some(logs) = link.get_logs(address, blocks.clone()).await? else {
                warn!(%from, block_range = ?blocks, "Log query answered null");
                return Err(IngestError::ReconciliationUnavailable { from });
            };

            for log in logs {
                match RawLogEntry::try_from(log) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(error = %e, block_range = ?blocks, "Skipping log"),
                }
            }
        }

        entries.sort_by_key(RawLogEntry::position);
        info!(%from, head, count = entries.len(), "Reconciliation query finished");
        Ok(entries)
    }
}
