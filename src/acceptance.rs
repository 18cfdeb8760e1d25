use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use alloy::primitives::TxHash;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::scheduler::Operation;

/// Submission and acceptance times of one operation, keyed by its transaction hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationRecord {
    pub operation_id: TxHash,
    pub operation: Operation,
    pub submitted_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_block: Option<u64>,
}

/// Shared map of operation records, written by the scheduler and read by the ingestor for
/// latency reporting.
///
/// A record is inserted once on submission and completed once on acceptance. Readers always see
/// a whole record.
#[derive(Clone, Debug, Default)]
pub struct AcceptanceLog {
    records: Arc<RwLock<HashMap<TxHash, OperationRecord>>>,
}

impl AcceptanceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh record. An existing record for the same id is kept as is.
    pub fn record_submitted(&self, operation_id: TxHash, operation: Operation) -> OperationRecord {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .entry(operation_id)
            .or_insert_with(|| OperationRecord {
                operation_id,
                operation,
                submitted_at: Utc::now(),
                accepted_at: None,
                accepted_block: None,
            })
            .clone()
    }

    /// Marks the operation as accepted in `block`. Returns the acceptance time, or `None` if the
    /// operation was never submitted.
    pub fn record_accepted(&self, operation_id: TxHash, block: u64) -> Option<DateTime<Utc>> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get_mut(&operation_id) else {
            warn!(%operation_id, "Acceptance recorded for an unknown operation");
            return None;
        };
        if record.accepted_at.is_none() {
            record.accepted_at = Some(Utc::now());
            record.accepted_block = Some(block);
        }
        record.accepted_at
    }

    #[must_use]
    pub fn get(&self, operation_id: &TxHash) -> Option<OperationRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).get(operation_id).cloned()
    }

    /// Time between the acceptance of `operation_id` and `observed_at`, if it was accepted.
    #[must_use]
    pub fn delay_since_accepted(
        &self,
        operation_id: &TxHash,
        observed_at: DateTime<Utc>,
    ) -> Option<TimeDelta> {
        let accepted_at = self.get(operation_id)?.accepted_at?;
        Some(observed_at - accepted_at)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, oldest submission first.
    #[must_use]
    pub fn records(&self) -> Vec<OperationRecord> {
        let mut records: Vec<_> =
            self.records.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        records.sort_by_key(|record| record.submitted_at);
        records
    }
}
