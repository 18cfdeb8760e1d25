//! Event-Ingestor observes every log a contract emits exactly once, across disconnects.
//!
//! The main entry point is [`EventIngestor`], built via [`EventIngestorBuilder`] from a
//! [`Connector`](remote::Connector) and a [`LogDecoder`](decoder::LogDecoder).
//!
//! # How it works
//!
//! A [`TransportWatchdog`] owns one WebSocket connection at a time and reports when it closes,
//! either because the push subscription ended or because the periodic liveness probe went
//! unanswered. On every (re)connection the ingestor runs a [`GapReconciler`] pass from its high
//! water mark (the greatest [`Position`] observed so far) up to the current head, then switches to
//! live push delivery. Reconnects are retried with exponential backoff and no cap.
//!
//! Both paths feed a single routine guarded by a [`DedupLedger`](dedup::DedupLedger): a position
//! is decoded and emitted the first time it is seen and silently dropped afterwards.
//!
//! # Stream items
//!
//! The stream yields [`IngestorResult`]s. Successful items are [`Message`] values, which wrap
//! either a [`DecodedEvent`] or a [`Notification`]. Decode failures are yielded as
//! [`IngestError::Decode`] and do not stop the stream.
//!
//! # Ordering
//!
//! Within one reconciliation pass or one live period, events are emitted in ascending position
//! order. Across a reconnect boundary, an event older than the high water mark may still appear;
//! it is preceded by [`Notification::OutOfOrder`].
//!
//! # End-of-run checks
//!
//! [`IngestorHandle::shutdown`] runs one last reconciliation query from the high water mark and
//! reports anything never emitted. [`audit::cross_check`] compares a query over any window with
//! the positions observed.

pub mod acceptance;
pub mod audit;
pub mod config;
pub mod contract;
pub mod decoder;
pub mod dedup;
pub mod range;
pub mod reconciler;
pub mod remote;
pub mod scheduler;
pub mod task;
pub mod watchdog;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod ingestor;
mod types;

pub use error::IngestError;
pub use types::{
    ChannelState, ConnectionState, DecodedEvent, IngestorResult, IntoIngestorResult, Message,
    Notification, Position, RawLogEntry,
};

pub use ingestor::{
    DEFAULT_INITIAL_CONNECT_RETRIES, DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_RECONNECT_MIN_DELAY,
    DEFAULT_STREAM_BUFFER_CAPACITY, EventIngestor, EventIngestorBuilder, IngestorHandle,
    IngestorState, ShutdownReport,
};
pub use reconciler::{DEFAULT_MAX_BLOCK_RANGE, GapReconciler};
pub use watchdog::{TransportWatchdog, WatchdogConfig};
