use std::{
    borrow::Cow,
    ops::RangeInclusive,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use alloy::{
    primitives::Address,
    providers::{Provider, ProviderBuilder, RootProvider, WsConnect},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::{
    IngestError,
    remote::{Connector, DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY, LogStream, PushStream, RemoteLink},
};

/// Opens Alloy WebSocket connections with Alloy's internal reconnection disabled.
///
/// Build one with [`WsConnectorBuilder`](crate::remote::WsConnectorBuilder).
#[derive(Clone, Debug)]
pub struct WsConnector {
    pub(crate) url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) call_timeout: Duration,
    pub(crate) max_retries: usize,
    pub(crate) min_delay: Duration,
    pub(crate) subscription_buffer_capacity: usize,
}

impl WsConnector {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> Result<WsLink, IngestError> {
        info!(url = %self.url, "Connecting WebSocket provider");

        let ws = WsConnect::new(self.url.clone()).with_max_retries(0);
        let provider = timeout(self.connect_timeout, ProviderBuilder::new().connect_ws(ws))
            .await?
            .inspect_err(|e| error!(error = %e, "WebSocket connection failed"))?;

        info!("WebSocket provider connected");
        Ok(WsLink::new(
            provider.root().to_owned(),
            self.call_timeout,
            self.max_retries,
            self.min_delay,
        )
        .with_subscription_buffer_capacity(self.subscription_buffer_capacity))
    }
}

/// A single WebSocket connection.
///
/// Every call is bounded by `call_timeout` (including retries) and retried with exponential
/// backoff up to `max_retries` times.
#[derive(Debug)]
pub struct WsLink {
    provider: Mutex<Option<RootProvider>>,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    subscription_buffer_capacity: usize,
}

impl WsLink {
    pub(crate) fn new(
        provider: RootProvider,
        call_timeout: Duration,
        max_retries: usize,
        min_delay: Duration,
    ) -> Self {
        Self {
            provider: Mutex::new(Some(provider)),
            call_timeout,
            max_retries,
            min_delay,
            subscription_buffer_capacity: DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY,
        }
    }

    /// Number of pushes the node may get ahead of the reader before they are lost.
    pub(crate) fn with_subscription_buffer_capacity(mut self, capacity: usize) -> Self {
        self.subscription_buffer_capacity = capacity;
        self
    }

    fn provider(&self) -> Result<RootProvider, IngestError> {
        self.provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| IngestError::TransportFailure("link already disconnected".into()))
    }

    /// Execute `operation` with exponential backoff and a total timeout.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Timeout`] if `call_timeout` elapses, retries included.
    /// * [`IngestError::TransportFailure`] if the link was already disconnected.
    /// * The last [`RpcError`] once retries are exhausted.
    async fn call<T, F, Fut>(&self, operation: F) -> Result<T, IngestError>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let provider = self.provider()?;
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    debug!(error = %err, "RPC error retrying after {:?}", dur);
                })
                .sleep(tokio::time::sleep),
        )
        .await?
        .map_err(IngestError::from)
    }
}

impl RemoteLink for WsLink {
    async fn subscribe_logs(&self, address: Address) -> Result<LogStream, IngestError> {
        info!(%address, "eth_subscribe called");
        let filter = Filter::new().address(address);
        let channel_size = self.subscription_buffer_capacity;
        let subscription = self
            .call(|provider| {
                let filter = filter.clone();
                async move { provider.subscribe_logs(&filter).channel_size(channel_size).await }
            })
            .await
            .inspect_err(|e| error!(error = %e, "eth_subscribe failed"))?;

        Ok(Box::pin(PushStream::new(subscription)))
    }

    async fn get_logs(
        &self,
        address: Address,
        blocks: RangeInclusive<u64>,
    ) -> Result<Option<Vec<Log>>, IngestError> {
        debug!(%address, block_range = ?blocks, "eth_getLogs called");
        let filter =
            Filter::new().address(address).from_block(*blocks.start()).to_block(*blocks.end());

        // Requested as `Option` so that a `null` result is not mistaken for an empty list.
        self.call(|provider| {
            let filter = filter.clone();
            async move {
                provider
                    .raw_request::<_, Option<Vec<Log>>>(Cow::Borrowed("eth_getLogs"), (filter,))
                    .await
            }
        })
        .await
        .inspect_err(|e| error!(error = %e, block_range = ?blocks, "eth_getLogs failed"))
    }

    async fn block_number(&self) -> Result<u64, IngestError> {
        self.call(|provider| async move { provider.get_block_number().await })
            .await
            .inspect_err(|e| debug!(error = %e, "eth_blockNumber failed"))
    }

    async fn disconnect(&self) {
        let released = self.provider.lock().unwrap_or_else(PoisonError::into_inner).take();
        if released.is_some() {
            info!("WebSocket provider released");
        }
    }
}
