use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};

use alloy::{pubsub::Subscription, rpc::types::Log};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::Stream;
use tokio_util::sync::ReusableBoxFuture;
use tracing::warn;

use crate::IngestError;

/// Receiving end of a bounded push channel.
pub(crate) trait PushReceiver: Send + 'static {
    fn recv(&mut self) -> impl Future<Output = Result<Log, RecvError>> + Send;
}

impl PushReceiver for Subscription<Log> {
    async fn recv(&mut self) -> Result<Log, RecvError> {
        Subscription::recv(self).await
    }
}

impl PushReceiver for broadcast::Receiver<Log> {
    async fn recv(&mut self) -> Result<Log, RecvError> {
        broadcast::Receiver::recv(self).await
    }
}

type Received<R> = (Result<Log, RecvError>, R);

async fn receive<R: PushReceiver>(mut receiver: R) -> Received<R> {
    let result = receiver.recv().await;
    (result, receiver)
}

/// Adapts a [`PushReceiver`] into a log stream.
///
/// The stream ends when the channel closes. If the receiver fell behind and pushes were
/// overwritten, it yields one [`IngestError::Lagged`] and ends: a gap in live delivery can only be
/// filled by reconciling.
pub(crate) struct PushStream<R: PushReceiver> {
    inner: ReusableBoxFuture<'static, Received<R>>,
    finished: bool,
}

impl<R: PushReceiver> PushStream<R> {
    pub(crate) fn new(receiver: R) -> Self {
        Self { inner: ReusableBoxFuture::new(receive(receiver)), finished: false }
    }
}

impl<R: PushReceiver> Stream for PushStream<R> {
    type Item = Result<Log, IngestError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let (result, receiver) = ready!(self.inner.poll(cx));

        match result {
            Ok(log) => {
                self.inner.set(receive(receiver));
                Poll::Ready(Some(Ok(log)))
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Log subscription lagged, pushes were lost");
                self.finished = true;
                Poll::Ready(Some(Err(IngestError::Lagged(skipped))))
            }
            Err(RecvError::Closed) => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}
