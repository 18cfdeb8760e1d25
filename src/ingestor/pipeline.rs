use alloy::rpc::types::Log;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    ChannelState, DecodedEvent, IngestError, IngestorResult, Message, Notification, Position,
    RawLogEntry,
    acceptance::AcceptanceLog,
    decoder::LogDecoder,
    dedup::{DedupLedger, LedgerView},
    types::{IntoIngestorResult, TryStream},
};

/// Where an entry came from. Only used for diagnostics: both paths are handled identically.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    Reconciliation,
    Live,
}

/// The single decode, dedup, emit and advance routine shared by reconciliation and live delivery.
pub(crate) struct Pipeline<D> {
    decoder: D,
    ledger: DedupLedger,
    /// Entries below this position predate the requested start and are never emitted.
    floor: Position,
    high_water_mark: watch::Sender<Position>,
    sender: mpsc::Sender<IngestorResult>,
    /// A send blocked on a full buffer gives up once this is cancelled.
    shutdown: CancellationToken,
    acceptance: Option<AcceptanceLog>,
}

impl<D: LogDecoder> Pipeline<D> {
    pub(crate) fn new(
        decoder: D,
        start: Position,
        high_water_mark: watch::Sender<Position>,
        sender: mpsc::Sender<IngestorResult>,
        shutdown: CancellationToken,
        acceptance: Option<AcceptanceLog>,
    ) -> Self {
        Self {
            decoder,
            ledger: DedupLedger::new(),
            floor: start,
            high_water_mark,
            sender,
            shutdown,
            acceptance,
        }
    }

    pub(crate) fn high_water_mark(&self) -> Position {
        *self.high_water_mark.borrow()
    }

    pub(crate) fn ledger_view(&self) -> LedgerView {
        self.ledger.view()
    }

    pub(crate) async fn notify(&self, notification: Notification) -> ChannelState {
        self.send(notification).await
    }

    /// Drops the downstream sender, closing the consumer's stream.
    pub(crate) fn finish(self) -> (LedgerView, Position) {
        let high_water_mark = *self.high_water_mark.borrow();
        (self.ledger.view(), high_water_mark)
    }

    /// Sends downstream, waiting for buffer space until shutdown is requested.
    ///
    /// Space that is already free is used even after shutdown.
    async fn send<M: IntoIngestorResult + Send>(&self, msg: M) -> ChannelState {
        tokio::select! {
            biased;

            state = self.sender.try_stream(msg) => state,
            () = self.shutdown.cancelled() => {
                warn!("Consumer is not reading, abandoning send on shutdown");
                ChannelState::Closed
            }
        }
    }

    pub(crate) async fn ingest_log(&self, log: Log, origin: Origin) -> ChannelState {
        match RawLogEntry::try_from(log) {
            Ok(entry) => self.ingest(entry, origin).await,
            Err(e) => {
                warn!(error = %e, ?origin, "Skipping log");
                ChannelState::Open
            }
        }
    }

    pub(crate) async fn ingest(&self, entry: RawLogEntry, origin: Origin) -> ChannelState {
        let position = entry.position();
        if position < self.floor {
            debug!(%position, floor = %self.floor, ?origin, "Ignoring event before the start position");
            return ChannelState::Open;
        }

        if !self.ledger.observe(position) {
            debug!(%position, ?origin, "Already seen this event");
            return ChannelState::Open;
        }
        let observed_at = Utc::now();

        let high_water_mark = self.high_water_mark();
        if position < high_water_mark {
            warn!(%position, %high_water_mark, ?origin, "This event was notified in the past");
            let signal = Notification::OutOfOrder { position, high_water_mark };
            if self.send(signal).await.is_closed() {
                self.ledger.forget(&position);
                return ChannelState::Closed;
            }
        }

        let item = match self.decoder.decode(&entry) {
            Ok(decoded) => {
                info!(%position, ?origin, name = %decoded.name, args = ?decoded.args, "Received event");
                let event = DecodedEvent {
                    name: decoded.name,
                    args: decoded.args,
                    position,
                    address: entry.address(),
                    transaction_hash: entry.transaction_hash(),
                    observed_at,
                };
                self.log_latency(&event);
                Ok(Message::Event(event))
            }
            Err(e) => {
                warn!(%position, ?origin, error = %e, "Could not decode log");
                Err(IngestError::Decode { position, reason: e.to_string() })
            }
        };

        if self.send(item).await.is_closed() {
            // never handed over, so the final pass must still see it as missing
            self.ledger.forget(&position);
            return ChannelState::Closed;
        }

        // advanced even if decoding failed: the position was observed
        self.high_water_mark.send_if_modified(|current| {
            if position > *current {
                *current = position;
                return true;
            }
            false
        });
        ChannelState::Open
    }

    fn log_latency(&self, event: &DecodedEvent) {
        let Some(acceptance) = &self.acceptance else {
            return;
        };
        let delay = event
            .transaction_hash
            .and_then(|hash| acceptance.delay_since_accepted(&hash, event.observed_at));
        match delay {
            Some(delay) => info!(
                position = %event.position,
                delay_since_accepted_ms = delay.num_milliseconds(),
                "Event latency"
            ),
            None => info!(position = %event.position, delay_since_accepted = "unknown", "Event latency"),
        }
    }
}
