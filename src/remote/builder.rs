use std::time::Duration;

use tracing::debug;

use crate::remote::WsConnector;

// RPC retry and timeout settings
/// Default timeout for opening a WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout used for every call on a link, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default maximum number of retry attempts.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
/// Default number of log pushes buffered per subscription.
pub const DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY: usize = 128;

/// Builder for constructing a [`WsConnector`].
///
/// Use this to configure timeouts and retry/backoff for every connection the connector opens.
#[derive(Clone, Debug)]
pub struct WsConnectorBuilder {
    url: String,
    connect_timeout: Duration,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    subscription_buffer_capacity: usize,
}

impl WsConnectorBuilder {
    /// Create a new builder for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            subscription_buffer_capacity: DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY,
        }
    }

    /// Create a builder with no retry attempts and only timeouts set.
    #[must_use]
    pub fn fragile(url: impl Into<String>) -> Self {
        Self::new(url).max_retries(0).min_delay(Duration::ZERO)
    }

    /// Set the timeout for opening a connection.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum timeout for RPC operations.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Set how many log pushes may queue up unread on a subscription.
    ///
    /// Once the reader falls further behind, the oldest pushes are lost and the connection is
    /// treated as closed, so the gap is filled by reconciling after the reconnect.
    #[must_use]
    pub fn subscription_buffer_capacity(mut self, capacity: usize) -> Self {
        self.subscription_buffer_capacity = capacity;
        self
    }

    /// Build the [`WsConnector`]. No connection is opened until
    /// [`Connector::connect`](crate::remote::Connector::connect) is called.
    #[must_use]
    pub fn build(self) -> WsConnector {
        debug!(
            url = %self.url,
            connect_timeout_ms = self.connect_timeout.as_millis(),
            call_timeout_ms = self.call_timeout.as_millis(),
            max_retries = self.max_retries,
            subscription_buffer_capacity = self.subscription_buffer_capacity,
            "Building WsConnector"
        );

        WsConnector {
            url: self.url,
            connect_timeout: self.connect_timeout,
            call_timeout: self.call_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
            // a push channel needs room for at least one push
            subscription_buffer_capacity: self.subscription_buffer_capacity.max(1),
        }
    }
}
