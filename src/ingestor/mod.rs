//! Exactly-once ingestion of the logs of one contract address.
//!
//! The ingestor moves through `Init -> Reconciling -> Live`, going back to `Reconciling` after
//! every reconnect, until it is `Terminated`. Each connection runs the same session:
//!
//! 1. subscribe to live delivery (read later, so nothing emitted meanwhile is lost),
//! 2. run a reconciliation pass from the high water mark up to the current head,
//! 3. switch to live delivery until the watchdog reports the connection closed.
//!
//! Both paths feed one routine that records the position in the [`DedupLedger`], advances the
//! high water mark and emits the decoded event. The ledger suppresses every position already
//! seen, so the overlap between a pass and live delivery is never emitted twice.
//!
//! [`DedupLedger`]: crate::dedup::DedupLedger

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use backon::{ExponentialBuilder, Retryable};
use tokio::sync::{mpsc, watch};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    IngestError, IngestorResult, Notification, Position,
    acceptance::AcceptanceLog,
    audit::{AuditReport, audit},
    decoder::LogDecoder,
    dedup::LedgerView,
    reconciler::GapReconciler,
    remote::Connector,
    watchdog::{StateSender, TransportWatchdog, WatchdogConfig},
};

mod builder;
mod handle;
mod pipeline;

pub use builder::{
    DEFAULT_INITIAL_CONNECT_RETRIES, DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_RECONNECT_MIN_DELAY,
    DEFAULT_STREAM_BUFFER_CAPACITY, EventIngestorBuilder,
};
pub use handle::{IngestorHandle, ShutdownReport};

use pipeline::{Origin, Pipeline};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IngestorState {
    Init,
    Reconciling,
    Live,
    Terminated,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReconnectPolicy {
    pub(crate) min_delay: Duration,
    pub(crate) max_delay: Duration,
}

/// How a session on one connection ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    ShutdownRequested,
    ConsumerGone,
}

/// A connected ingestor, ready to [`start`](Self::start).
pub struct EventIngestor<C: Connector, D> {
    pub(crate) connector: C,
    pub(crate) decoder: D,
    pub(crate) address: Address,
    pub(crate) start: Position,
    pub(crate) reconciler: GapReconciler,
    pub(crate) watchdog_config: WatchdogConfig,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) stream_buffer_capacity: usize,
    pub(crate) acceptance: Option<AcceptanceLog>,
    /// Shared by every connection the ingestor opens, so the handle sees one state.
    pub(crate) connection_state: StateSender,
    pub(crate) watchdog: TransportWatchdog<C::Link>,
}

impl<C: Connector, D: LogDecoder> EventIngestor<C, D> {
    /// Spawns the ingestion task and returns its handle and the event stream.
    ///
    /// The stream yields, in order: events from the first reconciliation pass,
    /// [`Notification::SwitchingToLive`], live events, and after every lost connection
    /// [`Notification::Disconnected`] followed by the same sequence again.
    #[must_use]
    pub fn start(self) -> (IngestorHandle, ReceiverStream<IngestorResult>) {
        let (sender, receiver) = mpsc::channel(self.stream_buffer_capacity);
        let (state, state_rx) = watch::channel(IngestorState::Init);
        let (high_water_mark, high_water_mark_rx) = watch::channel(self.start);
        let shutdown = CancellationToken::new();

        let Self {
            connector,
            decoder,
            address,
            start,
            reconciler,
            watchdog_config,
            reconnect,
            acceptance,
            connection_state,
            watchdog,
            ..
        } = self;

        let pipeline =
            Pipeline::new(decoder, start, high_water_mark, sender, shutdown.clone(), acceptance);
        let ledger = pipeline.ledger_view();
        let connection_state_rx = connection_state.subscribe();
        let worker = Worker {
            connector,
            address,
            reconciler,
            watchdog_config,
            reconnect,
            state,
            connection_state,
        };

        let task = tokio::spawn(worker.run(watchdog, pipeline, shutdown.clone()));

        let handle = IngestorHandle {
            shutdown,
            task,
            state: state_rx,
            high_water_mark: high_water_mark_rx,
            connection_state: connection_state_rx,
            ledger,
        };
        (handle, ReceiverStream::new(receiver))
    }
}

/// Why a send failed: the consumer went away, or shutdown gave up on a full buffer.
fn stopped(shutdown: &CancellationToken) -> SessionEnd {
    if shutdown.is_cancelled() { SessionEnd::ShutdownRequested } else { SessionEnd::ConsumerGone }
}

struct Worker<C> {
    connector: C,
    address: Address,
    reconciler: GapReconciler,
    watchdog_config: WatchdogConfig,
    reconnect: ReconnectPolicy,
    state: watch::Sender<IngestorState>,
    connection_state: StateSender,
}

impl<C: Connector> Worker<C> {
    async fn run<D: LogDecoder>(
        self,
        mut watchdog: TransportWatchdog<C::Link>,
        pipeline: Pipeline<D>,
        shutdown: CancellationToken,
    ) -> ShutdownReport {
        let mut attempt = watchdog.attempt();

        loop {
            let end = self.session(&watchdog, &pipeline, &shutdown).await;
            if end == SessionEnd::Disconnected {
                warn!(high_water_mark = %pipeline.high_water_mark(), "Transport lost, reconnecting");
            }
            watchdog.close().await;

            match end {
                SessionEnd::Disconnected => {
                    if pipeline.notify(Notification::Disconnected).await.is_closed() {
                        break;
                    }
                }
                SessionEnd::ShutdownRequested => break,
                SessionEnd::ConsumerGone => {
                    info!("Event stream dropped, stopping ingestion");
                    break;
                }
            }

            match self.reconnect(&mut attempt, &shutdown).await {
                Some(next) => watchdog = next,
                None => break,
            }
        }

        self.state.send_replace(IngestorState::Terminated);
        let (ledger, high_water_mark) = pipeline.finish();
        info!(%high_water_mark, observed = ledger.len(), "Ingestion terminated");

        let final_pass = self.final_pass(high_water_mark, &ledger, attempt + 1).await;
        match &final_pass {
            Ok(report) if report.is_clean() => info!("Final pass found no missed events"),
            Ok(report) => error!(missed = report.missed.len(), "Final pass found missed events"),
            Err(e) => error!(error = %e, "Final pass failed"),
        }

        ShutdownReport { high_water_mark, observed: ledger.len(), final_pass }
    }

    async fn session<D: LogDecoder>(
        &self,
        watchdog: &TransportWatchdog<C::Link>,
        pipeline: &Pipeline<D>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let mut live = match watchdog.subscribe_logs(self.address).await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Live subscription failed");
                return SessionEnd::Disconnected;
            }
        };
        info!(address = %self.address, "Subscribed to event notifications");

        self.state.send_replace(IngestorState::Reconciling);
        let from = pipeline.high_water_mark();
        // not raced against shutdown: a pass in flight is drained before terminating
        let pass = tokio::select! {
            biased;

            () = watchdog.disconnected() => return SessionEnd::Disconnected,
            pass = self.reconciler.reconcile(watchdog.link(), from, self.address) => pass,
        };
        match pass {
            Ok(entries) => {
                info!(%from, count = entries.len(), "Loaded missed events");
                for entry in entries {
                    if pipeline.ingest(entry, Origin::Reconciliation).await.is_closed() {
                        return stopped(shutdown);
                    }
                }
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Reconciliation failed, proceeding to live delivery");
            }
            Err(e) => {
                error!(error = %e, "Could not verify missed events, proceeding to live delivery");
            }
        }

        if shutdown.is_cancelled() {
            return SessionEnd::ShutdownRequested;
        }

        self.state.send_replace(IngestorState::Live);
        if pipeline.notify(Notification::SwitchingToLive).await.is_closed() {
            return stopped(shutdown);
        }

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => return SessionEnd::ShutdownRequested,
                log = live.next() => match log {
                    Some(log) => {
                        if pipeline.ingest_log(log, Origin::Live).await.is_closed() {
                            return stopped(shutdown);
                        }
                    }
                    None => return SessionEnd::Disconnected,
                },
                () = watchdog.disconnected() => return SessionEnd::Disconnected,
            }
        }
    }

    /// Reconnects with uncapped exponential backoff. Returns `None` if shutdown was requested
    /// first.
    async fn reconnect(
        &self,
        attempt: &mut u64,
        shutdown: &CancellationToken,
    ) -> Option<TransportWatchdog<C::Link>> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.reconnect.min_delay)
            .with_max_delay(self.reconnect.max_delay)
            .without_max_times();

        let reconnecting = (|| {
            *attempt += 1;
            TransportWatchdog::connect_with_state(
                &self.connector,
                &self.watchdog_config,
                *attempt,
                Arc::clone(&self.connection_state),
            )
        })
        .retry(backoff)
        .notify(|err: &IngestError, dur: Duration| {
            warn!(error = %err, "Reconnection failed, retrying after {:?}", dur);
        })
        .sleep(tokio::time::sleep);

        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Shutdown requested while reconnecting");
                None
            }
            result = reconnecting => match result {
                Ok(watchdog) => {
                    info!(attempt = watchdog.attempt(), "Reconnected");
                    Some(watchdog)
                }
                Err(e) => {
                    error!(error = %e, "Giving up reconnecting");
                    None
                }
            },
        }
    }

    /// Runs one reconciliation query from the high water mark on a short-lived connection.
    async fn final_pass(
        &self,
        from: Position,
        ledger: &LedgerView,
        attempt: u64,
    ) -> Result<AuditReport, IngestError> {
        info!(%from, "Running final reconciliation pass");
        let watchdog =
            TransportWatchdog::connect(&self.connector, &self.watchdog_config, attempt).await?;
        let report = audit(watchdog.link(), &self.reconciler, self.address, from, ledger).await;
        watchdog.close().await;
        report
    }
}
