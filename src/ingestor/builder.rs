use std::time::Duration;

use std::sync::Arc;

use alloy::primitives::Address;
use backon::{ExponentialBuilder, Retryable};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    ConnectionState, IngestError, Position,
    acceptance::AcceptanceLog,
    decoder::LogDecoder,
    ingestor::{EventIngestor, ReconnectPolicy},
    reconciler::{DEFAULT_MAX_BLOCK_RANGE, GapReconciler},
    remote::Connector,
    watchdog::{TransportWatchdog, WatchdogConfig},
};

/// Default number of messages buffered for the consumer.
pub const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 50_000;
/// Default number of retries for the first connection. Later reconnects retry forever.
pub const DEFAULT_INITIAL_CONNECT_RETRIES: usize = 3;
pub const DEFAULT_RECONNECT_MIN_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Builder for an [`EventIngestor`] watching the logs of one contract address.
///
/// # Example
///
/// ```no_run
/// # use alloy::primitives::address;
/// # use event_ingestor::{EventIngestorBuilder, Message, decoder::SampleCounterDecoder, remote::WsConnectorBuilder};
/// # use tokio_stream::StreamExt;
/// #
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = WsConnectorBuilder::new("ws://localhost:8545").build();
/// let ingestor = EventIngestorBuilder::new(address!("0xd8dA6BF26964af9d7eed9e03e53415d37aa96045"))
///     .from_block(1_000)
///     .connect(connector, SampleCounterDecoder)
///     .await?;
///
/// let (handle, mut stream) = ingestor.start();
/// while let Some(Ok(Message::Event(event))) = stream.next().await {
///     println!("{} at {}", event.name, event.position);
/// }
/// let report = handle.shutdown().await?;
/// println!("clean: {}", report.is_clean());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct EventIngestorBuilder {
    pub(crate) address: Address,
    pub(crate) start: Position,
    pub(crate) max_block_range: u64,
    pub(crate) stream_buffer_capacity: usize,
    pub(crate) watchdog: WatchdogConfig,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) initial_connect_retries: usize,
    pub(crate) acceptance: Option<AcceptanceLog>,
}

impl EventIngestorBuilder {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            start: Position::default(),
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
            watchdog: WatchdogConfig::default(),
            reconnect: ReconnectPolicy {
                min_delay: DEFAULT_RECONNECT_MIN_DELAY,
                max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            },
            initial_connect_retries: DEFAULT_INITIAL_CONNECT_RETRIES,
            acceptance: None,
        }
    }

    /// Position to start from. Nothing before it is emitted.
    #[must_use]
    pub fn from_position(mut self, position: impl Into<Position>) -> Self {
        self.start = position.into();
        self
    }

    /// Starts from the first position of `block`, typically the contract deployment block.
    #[must_use]
    pub fn from_block(self, block: u64) -> Self {
        self.from_position(Position::from_block(block))
    }

    #[must_use]
    pub fn max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range;
        self
    }

    #[must_use]
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.watchdog.probe_interval = interval;
        self
    }

    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog.probe_timeout = timeout;
        self
    }

    /// Bounds of the exponential backoff between connection attempts.
    #[must_use]
    pub fn reconnect_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.reconnect = ReconnectPolicy { min_delay, max_delay };
        self
    }

    #[must_use]
    pub fn initial_connect_retries(mut self, retries: usize) -> Self {
        self.initial_connect_retries = retries;
        self
    }

    /// Shares the scheduler's acceptance times so event latency can be logged.
    #[must_use]
    pub fn acceptance_log(mut self, acceptance: AcceptanceLog) -> Self {
        self.acceptance = Some(acceptance);
        self
    }

    /// Validates the configuration and opens the first connection.
    ///
    /// # Errors
    ///
    /// * [`IngestError::InvalidMaxBlockRange`] if `max_block_range` is 0.
    /// * [`IngestError::InvalidBufferCapacity`] if `stream_buffer_capacity` is 0.
    /// * The last connection error once the initial retries are exhausted.
    pub async fn connect<C, D>(
        self,
        connector: C,
        decoder: D,
    ) -> Result<EventIngestor<C, D>, IngestError>
    where
        C: Connector,
        D: LogDecoder,
    {
        let reconciler = GapReconciler::new(self.max_block_range)?;
        if self.stream_buffer_capacity == 0 {
            return Err(IngestError::InvalidBufferCapacity);
        }

        let connection_state = Arc::new(watch::channel(ConnectionState::Connecting).0);
        let mut attempt = 0;
        let watchdog = (|| {
            attempt += 1;
            TransportWatchdog::connect_with_state(
                &connector,
                &self.watchdog,
                attempt,
                Arc::clone(&connection_state),
            )
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(self.reconnect.min_delay)
                .with_max_delay(self.reconnect.max_delay)
                .with_max_times(self.initial_connect_retries),
        )
        .notify(|err: &IngestError, dur: Duration| {
            warn!(error = %err, "Initial connection failed, retrying after {:?}", dur);
        })
        .sleep(tokio::time::sleep)
        .await
        .inspect_err(|e| error!(error = %e, "Could not establish the initial connection"))?;

        info!(address = %self.address, start = %self.start, "Event ingestor connected");

        Ok(EventIngestor {
            connector,
            decoder,
            address: self.address,
            start: self.start,
            reconciler,
            watchdog_config: self.watchdog,
            reconnect: self.reconnect,
            stream_buffer_capacity: self.stream_buffer_capacity,
            acceptance: self.acceptance,
            connection_state,
            watchdog,
        })
    }
}
