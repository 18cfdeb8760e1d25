use std::time::Duration;

use event_ingestor::{
    Notification, assert_next_event, assert_next_notification,
    test_utils::{MockChain, added_at},
};

use crate::common::{COUNTER, await_live_again, fast_builder, start_ingestor};

#[tokio::test]
async fn unanswered_probe_triggers_a_reconnect() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    // pushes stop arriving and the head stops answering, without the stream ending
    chain.set_drop_pushes(true);
    chain.set_stalled(true);
    chain.emit(added_at(COUNTER, (1, 0, 0), 1, 1));

    assert_next_notification!(stream, Notification::Disconnected);
    chain.set_stalled(false);
    chain.set_drop_pushes(false);

    assert_next_event!(stream, (1, 0, 0));
    await_live_again(&mut stream).await;
    assert!(chain.connect_count() >= 2);

    chain.emit(added_at(COUNTER, (2, 0, 0), 1, 2));
    assert_next_event!(stream, (2, 0, 0));

    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    Ok(())
}

#[tokio::test]
async fn healthy_probe_keeps_the_connection() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    // several probe periods
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(chain.connect_count(), 1);
    assert_eq!(chain.subscriber_count(), 1);
    assert!(stream.into_inner().is_empty());

    handle.shutdown().await?;
    Ok(())
}
