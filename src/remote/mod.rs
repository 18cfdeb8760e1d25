//! Boundary to the remote log source.
//!
//! The ingestor never talks to a node directly. It goes through two small traits:
//!
//! * [`Connector`] opens one physical connection ([`RemoteLink`]) per call.
//! * [`RemoteLink`] exposes the three primitives the ingestor needs: a push subscription for the
//!   logs of one address, a historical log query over a block range, and the current head block
//!   (which doubles as the liveness probe).
//!
//! [`WsConnector`] implements both on top of an Alloy WebSocket provider, wrapping every call in
//! a total timeout and exponential backoff retries. Alloy's own WebSocket reconnection is
//! disabled so that a dropped socket surfaces as the end of the push stream, which is what the
//! [`TransportWatchdog`](crate::TransportWatchdog) watches for.
//!
//! # Examples
//!
//! ```rust,no_run
//! use event_ingestor::remote::{Connector, RemoteLink, WsConnectorBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let connector = WsConnectorBuilder::new("ws://localhost:8545")
//!     .call_timeout(Duration::from_secs(30))
//!     .max_retries(5)
//!     .build();
//!
//! let link = connector.connect().await?;
//! println!("Current head: {}", link.block_number().await?);
//! # Ok(()) }
//! ```

use std::{future::Future, ops::RangeInclusive, pin::Pin};

use alloy::{primitives::Address, rpc::types::Log};
use tokio_stream::Stream;

use crate::IngestError;

pub mod builder;
mod push;
pub mod ws;

pub use builder::*;
pub(crate) use push::PushStream;
pub use ws::{WsConnector, WsLink};

/// Push delivery of logs for one address.
///
/// The stream ends when the transport closes. If pushes were lost because the receiver fell behind,
/// it yields [`IngestError::Lagged`] once and ends.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Log, IngestError>> + Send>>;

/// One physical connection to the remote log source.
pub trait RemoteLink: Send + Sync + 'static {
    /// Subscribes to logs emitted by `address` from now on.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription request fails.
    fn subscribe_logs(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<LogStream, IngestError>> + Send;

    /// Fetches the logs emitted by `address` in `blocks`.
    ///
    /// Returns `Ok(None)` when the node answered with `null` rather than a list. Callers must not
    /// treat that as "no logs".
    ///
    /// # Errors
    ///
    /// Returns an error if the query could not be executed.
    fn get_logs(
        &self,
        address: Address,
        blocks: RangeInclusive<u64>,
    ) -> impl Future<Output = Result<Option<Vec<Log>>, IngestError>> + Send;

    /// Fetches the current head block number.
    ///
    /// # Errors
    ///
    /// Returns an error if the node did not answer.
    fn block_number(&self) -> impl Future<Output = Result<u64, IngestError>> + Send;

    /// Releases the connection. Further calls fail with a transport error.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Factory for [`RemoteLink`]s. Each call to [`connect`](Connector::connect) is one attempt.
pub trait Connector: Send + Sync + 'static {
    type Link: RemoteLink;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be established.
    fn connect(&self) -> impl Future<Output = Result<Self::Link, IngestError>> + Send;
}
