use std::fmt::{self, Display};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, TxHash},
    rpc::types::Log,
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::IngestError;

/// Location of a log in the chain history.
///
/// Ordered by block number, then transaction index, then log index. Used both as the dedup key
/// and as the resume cursor after a reconnect.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl Position {
    #[must_use]
    pub const fn new(block_number: u64, transaction_index: u64, log_index: u64) -> Self {
        Self { block_number, transaction_index, log_index }
    }

    /// The first possible position inside `block_number`.
    #[must_use]
    pub const fn from_block(block_number: u64) -> Self {
        Self::new(block_number, 0, 0)
    }

    /// Extracts the position of an RPC log, if the node reported one.
    #[must_use]
    pub fn of(log: &Log) -> Option<Self> {
        Some(Self::new(log.block_number?, log.transaction_index?, log.log_index?))
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block={} tx={} idx={}", self.block_number, self.transaction_index, self.log_index)
    }
}

impl From<(u64, u64, u64)> for Position {
    fn from((block_number, transaction_index, log_index): (u64, u64, u64)) -> Self {
        Self::new(block_number, transaction_index, log_index)
    }
}

/// A log exactly as the node delivered it, together with its [`Position`].
#[derive(Clone, Debug, PartialEq)]
pub struct RawLogEntry {
    position: Position,
    log: Log,
}

impl RawLogEntry {
    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.log.inner.address
    }

    #[must_use]
    pub fn transaction_hash(&self) -> Option<TxHash> {
        self.log.transaction_hash
    }

    #[must_use]
    pub fn log(&self) -> &Log {
        &self.log
    }
}

impl TryFrom<Log> for RawLogEntry {
    type Error = IngestError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let position = Position::of(&log).ok_or(IngestError::MissingPosition)?;
        Ok(Self { position, log })
    }
}

/// A log decoded into a named event, stamped with the time it was first observed.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub args: Vec<DynSolValue>,
    pub position: Position,
    pub address: Address,
    pub transaction_hash: Option<TxHash>,
    pub observed_at: DateTime<Utc>,
}

/// Lifecycle of one physical connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Debug, Clone, PartialEq)]
pub enum Notification {
    /// The reconciliation pass finished and live delivery is attached.
    SwitchingToLive,
    /// The transport was lost; a reconnect and reconciliation will follow.
    Disconnected,
    /// The next event is older than everything observed so far.
    OutOfOrder { position: Position, high_water_mark: Position },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Event(DecodedEvent),
    Notification(Notification),
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Message::Notification(value)
    }
}

impl From<DecodedEvent> for Message {
    fn from(value: DecodedEvent) -> Self {
        Message::Event(value)
    }
}

impl PartialEq<Notification> for Message {
    fn eq(&self, other: &Notification) -> bool {
        if let Message::Notification(notification) = self { notification == other } else { false }
    }
}

/// Events carry a fresh timestamp, so comparisons against a position only look at where the
/// event came from.
impl PartialEq<Position> for Message {
    fn eq(&self, other: &Position) -> bool {
        if let Message::Event(event) = self { event.position == *other } else { false }
    }
}

pub type IngestorResult = Result<Message, IngestError>;

pub trait IntoIngestorResult {
    fn into_ingestor_result(self) -> IngestorResult;
}

impl IntoIngestorResult for IngestorResult {
    fn into_ingestor_result(self) -> IngestorResult {
        self
    }
}

impl IntoIngestorResult for Message {
    fn into_ingestor_result(self) -> IngestorResult {
        Ok(self)
    }
}

impl IntoIngestorResult for DecodedEvent {
    fn into_ingestor_result(self) -> IngestorResult {
        Ok(Message::Event(self))
    }
}

impl IntoIngestorResult for Notification {
    fn into_ingestor_result(self) -> IngestorResult {
        Ok(Message::Notification(self))
    }
}

impl IntoIngestorResult for IngestError {
    fn into_ingestor_result(self) -> IngestorResult {
        Err(self)
    }
}

/// Whether the downstream consumer is still listening.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

impl ChannelState {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, ChannelState::Open)
    }

    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

pub(crate) trait TryStream {
    async fn try_stream<M: IntoIngestorResult + Send>(&self, msg: M) -> ChannelState;
}

impl TryStream for mpsc::Sender<IngestorResult> {
    async fn try_stream<M: IntoIngestorResult + Send>(&self, msg: M) -> ChannelState {
        let item = msg.into_ingestor_result();
        match &item {
            Ok(msg) => debug!(item = ?msg, "Sending message"),
            Err(err) => debug!(error = %err, "Sending error"),
        }
        if let Err(err) = self.send(item).await {
            warn!(error = %err, "Downstream channel closed, stopping ingestion");
            return ChannelState::Closed;
        }
        ChannelState::Open
    }
}
