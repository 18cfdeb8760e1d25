use alloy::primitives::Address;
use tracing::{error, info};

use crate::{
    IngestError, Position, RawLogEntry,
    dedup::LedgerView,
    reconciler::GapReconciler,
    remote::{Connector, RemoteLink},
};

/// Outcome of comparing an authoritative log query against what was observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditReport {
    pub from: Position,
    /// Number of entries the query returned at or after `from`.
    pub checked: usize,
    /// Entries the query returned that were never observed, in ascending order.
    pub missed: Vec<Position>,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missed.is_empty()
    }
}

/// Queries every log of `address` from `from` to the current head and reports those missing
/// from `ledger`.
///
/// # Errors
///
/// Fails like [`GapReconciler::reconcile`], including
/// [`IngestError::ReconciliationUnavailable`] when the query answered `null`.
pub async fn audit<L: RemoteLink>(
    link: &L,
    reconciler: &GapReconciler,
    address: Address,
    from: Position,
    ledger: &LedgerView,
) -> Result<AuditReport, IngestError> {
    let entries = reconciler.reconcile(link, from, address).await?;
    let candidates: Vec<Position> =
        entries.iter().map(RawLogEntry::position).filter(|position| *position >= from).collect();

    let missed = ledger.missing(&candidates);
    if missed.is_empty() {
        info!(%from, checked = candidates.len(), "All events have been processed");
    } else {
        for position in &missed {
            error!(%position, "Missed event");
        }
        error!(%from, checked = candidates.len(), missed = missed.len(), "Missed events detected");
    }

    Ok(AuditReport { from, checked: candidates.len(), missed })
}

/// Runs [`audit`] on a dedicated connection that is released afterwards.
///
/// # Errors
///
/// Fails if the connection cannot be opened or the audit fails.
pub async fn cross_check<C: Connector>(
    connector: &C,
    reconciler: &GapReconciler,
    address: Address,
    from: Position,
    ledger: &LedgerView,
) -> Result<AuditReport, IngestError> {
    info!(%from, %address, "Querying the whole monitored window");
    let link = connector.connect().await?;
    let report = audit(&link, reconciler, address, from, ledger).await;
    link.disconnect().await;
    report
}
