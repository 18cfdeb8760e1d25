use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    ConnectionState, IngestError, Position,
    audit::AuditReport,
    dedup::LedgerView,
    ingestor::IngestorState,
};

/// Summary returned once the ingestor has stopped.
#[derive(Clone, Debug)]
pub struct ShutdownReport {
    pub high_water_mark: Position,
    /// Number of distinct positions observed during the run.
    pub observed: usize,
    /// Result of the reconciliation pass run from the high water mark after the transport was
    /// released. Entries listed as missed there were never emitted.
    pub final_pass: Result<AuditReport, IngestError>,
}

impl ShutdownReport {
    /// Whether the final pass ran and found nothing missed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.final_pass.as_ref().is_ok_and(AuditReport::is_clean)
    }
}

/// Controls a running ingestor.
///
/// Dropping the handle does not stop ingestion; dropping the event stream does.
#[derive(Debug)]
pub struct IngestorHandle {
    pub(crate) shutdown: CancellationToken,
    pub(crate) task: JoinHandle<ShutdownReport>,
    pub(crate) state: watch::Receiver<IngestorState>,
    pub(crate) high_water_mark: watch::Receiver<Position>,
    pub(crate) connection_state: watch::Receiver<ConnectionState>,
    pub(crate) ledger: LedgerView,
}

impl IngestorHandle {
    #[must_use]
    pub fn state(&self) -> IngestorState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<IngestorState> {
        self.state.clone()
    }

    #[must_use]
    pub fn high_water_mark(&self) -> Position {
        *self.high_water_mark.borrow()
    }

    #[must_use]
    pub fn high_water_mark_changes(&self) -> watch::Receiver<Position> {
        self.high_water_mark.clone()
    }

    /// Waits until the high water mark reaches `block`, for at most `limit`. Returns whether it
    /// did.
    pub async fn wait_for_block(&self, block: u64, limit: Duration) -> bool {
        let mut changes = self.high_water_mark.clone();
        let reached = timeout(limit, changes.wait_for(|hwm| hwm.block_number >= block)).await;
        matches!(reached, Ok(Ok(_)))
    }

    /// State of the current connection. Between connections it is `Connecting` while an attempt
    /// runs and `Closed` otherwise.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }

    #[must_use]
    pub fn connection_state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.clone()
    }

    /// Positions observed so far.
    #[must_use]
    pub fn ledger(&self) -> LedgerView {
        self.ledger.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops live delivery, lets an in-flight reconciliation pass finish, releases the transport
    /// and runs the final pass.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::TaskFailed`] if the ingestion task panicked.
    pub async fn shutdown(self) -> Result<ShutdownReport, IngestError> {
        info!("Shutdown requested");
        self.shutdown.cancel();
        Ok(self.task.await?)
    }
}
