//! Lifecycle of one physical connection.
//!
//! A [`TransportWatchdog`] owns exactly one [`RemoteLink`]. It publishes the link's
//! [`ConnectionState`] and turns two kinds of failure into the same `Closed` transition:
//!
//! * the push subscription stream ending (a hard socket close) or falling behind, and
//! * the periodic liveness probe not being answered within `probe_timeout`.
//!
//! `Closed` is signalled at most once per watchdog. Reconnecting is the caller's job: a
//! watchdog never opens a second connection.

use std::{
    ops::ControlFlow,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use alloy::{primitives::Address, rpc::types::Log};
use tokio::{sync::watch, time::timeout};
use tokio_stream::Stream;
use tracing::{debug, info, trace, warn};

use crate::{
    ConnectionState, IngestError,
    remote::{Connector, LogStream, RemoteLink},
    task::ScheduledTask,
};

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Where a connection publishes its [`ConnectionState`]. May be shared by successive connections.
pub type StateSender = Arc<watch::Sender<ConnectionState>>;

/// Moves the state to `Closed` unless it already is. Returns whether this call did it.
fn mark_closed(state: &watch::Sender<ConnectionState>, attempt: u64, reason: &str) -> bool {
    let signalled = state.send_if_modified(|current| {
        if current.is_closed() {
            return false;
        }
        *current = ConnectionState::Closed;
        true
    });
    if signalled {
        warn!(attempt, reason, "Connection state CLOSED");
    }
    signalled
}

#[derive(Debug)]
pub struct TransportWatchdog<L: RemoteLink> {
    link: Arc<L>,
    state: StateSender,
    probe: Option<ScheduledTask>,
    attempt: u64,
}

impl<L: RemoteLink> TransportWatchdog<L> {
    /// Makes one connection attempt and starts the liveness probe on success.
    ///
    /// `attempt` only labels log lines.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Timeout`] if the attempt takes longer than `connect_timeout`.
    /// * Whatever the connector returned otherwise.
    pub async fn connect<C>(
        connector: &C,
        config: &WatchdogConfig,
        attempt: u64,
    ) -> Result<Self, IngestError>
    where
        C: Connector<Link = L>,
    {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self::connect_with_state(connector, config, attempt, Arc::new(state)).await
    }

    /// Like [`connect`](Self::connect), but publishes on `state`, which outlives this
    /// connection. The attempt shows as `Connecting` while it runs and as `Closed` if it fails.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_state<C>(
        connector: &C,
        config: &WatchdogConfig,
        attempt: u64,
        state: StateSender,
    ) -> Result<Self, IngestError>
    where
        C: Connector<Link = L>,
    {
        state.send_replace(ConnectionState::Connecting);
        debug!(attempt, "Connection state CONNECTING");

        let link = match timeout(config.connect_timeout, connector.connect()).await {
            Ok(Ok(link)) => Arc::new(link),
            Ok(Err(e)) => {
                state.send_replace(ConnectionState::Closed);
                warn!(attempt, error = %e, "Connection attempt failed");
                return Err(e);
            }
            Err(_) => {
                state.send_replace(ConnectionState::Closed);
                warn!(attempt, "Connection attempt timed out");
                return Err(IngestError::Timeout);
            }
        };

        state.send_replace(ConnectionState::Open);
        info!(attempt, "Connection state OPEN");

        let probe = Self::spawn_probe(Arc::clone(&link), Arc::clone(&state), config, attempt);
        Ok(Self { link, state, probe: Some(probe), attempt })
    }

    fn spawn_probe(
        link: Arc<L>,
        state: StateSender,
        config: &WatchdogConfig,
        attempt: u64,
    ) -> ScheduledTask {
        let probe_timeout = config.probe_timeout;
        ScheduledTask::every("liveness-probe", config.probe_interval, move || {
            let link = Arc::clone(&link);
            let state = Arc::clone(&state);
            async move {
                let closed = state.borrow().is_closed();
                if closed {
                    return ControlFlow::Break(());
                }
                match timeout(probe_timeout, link.block_number()).await {
                    Ok(Ok(head)) => {
                        trace!(attempt, head, "Liveness probe answered");
                        ControlFlow::Continue(())
                    }
                    Ok(Err(e)) => {
                        mark_closed(&state, attempt, &format!("liveness probe failed: {e}"));
                        ControlFlow::Break(())
                    }
                    Err(_) => {
                        mark_closed(&state, attempt, "liveness probe timed out");
                        ControlFlow::Break(())
                    }
                }
            }
        })
    }

    /// Current state, read without waiting.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Resolves once the connection is `Closed`, immediately if it already is.
    pub async fn disconnected(&self) {
        let mut changes = self.state.subscribe();
        loop {
            let closed = changes.borrow_and_update().is_closed();
            if closed || changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Subscribes to the logs of `address`. The connection is marked `Closed` when the returned
    /// stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription request fails.
    pub async fn subscribe_logs(&self, address: Address) -> Result<WatchedLogStream, IngestError> {
        let inner = self.link.subscribe_logs(address).await?;
        Ok(WatchedLogStream {
            inner,
            state: Arc::clone(&self.state),
            attempt: self.attempt,
            ended: false,
        })
    }

    /// Stops the probe and releases the connection.
    pub async fn close(mut self) {
        let was_live = self.state.send_if_modified(|current| {
            if current.is_closed() {
                return false;
            }
            *current = ConnectionState::Closing;
            true
        });
        if was_live {
            info!(attempt = self.attempt, "Connection state CLOSING");
        }

        if let Some(probe) = self.probe.take() {
            debug!(attempt = self.attempt, task = probe.name(), "Stopping scheduled task");
            probe.shutdown().await;
        }
        self.link.disconnect().await;

        if was_live {
            self.state.send_replace(ConnectionState::Closed);
            info!(attempt = self.attempt, "Connection state CLOSED");
        }
    }
}

/// Push stream that marks its connection `Closed` when it ends or loses pushes.
pub struct WatchedLogStream {
    inner: LogStream,
    state: StateSender,
    attempt: u64,
    ended: bool,
}

impl Stream for WatchedLogStream {
    type Item = Log;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Log>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match ready!(self.inner.as_mut().poll_next(cx)) {
            Some(Ok(log)) => Poll::Ready(Some(log)),
            Some(Err(e)) => {
                self.ended = true;
                mark_closed(&self.state, self.attempt, &e.to_string());
                Poll::Ready(None)
            }
            None => {
                self.ended = true;
                mark_closed(&self.state, self.attempt, "log subscription ended");
                Poll::Ready(None)
            }
        }
    }
}
