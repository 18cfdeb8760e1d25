use std::time::Duration;

use event_ingestor::{
    ConnectionState, IngestError, IngestorState, Notification, Position, assert_closed,
    assert_next_event, assert_next_notification,
    test_utils::{MockChain, added_at},
};

use crate::common::{COUNTER, await_live_again, fast_builder, start_ingestor};

#[tokio::test]
async fn entries_emitted_during_an_outage_are_reconciled_before_going_live() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().from_block(200)).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (200, 0, 0), 1, 1));
    assert_next_event!(stream, (200, 0, 0));

    chain.set_offline(true);
    chain.kill_connections();
    assert_next_notification!(stream, Notification::Disconnected);

    chain.record(added_at(COUNTER, (201, 0, 0), 1, 2));
    chain.record(added_at(COUNTER, (202, 0, 0), 1, 3));
    chain.record(added_at(COUNTER, (203, 0, 0), 1, 4));
    chain.record(added_at(COUNTER, (204, 0, 0), 1, 5));
    chain.record(added_at(COUNTER, (205, 1, 0), 1, 6));

    // a few refused attempts before the node comes back
    tokio::time::sleep(Duration::from_millis(100)).await;
    chain.set_offline(false);

    assert_next_event!(stream, (201, 0, 0));
    assert_next_event!(stream, (202, 0, 0));
    assert_next_event!(stream, (203, 0, 0));
    assert_next_event!(stream, (204, 0, 0));
    assert_next_event!(stream, (205, 1, 0));
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert_eq!(handle.state(), IngestorState::Live);
    assert_eq!(chain.connect_count(), 2);

    // the reconnect pass started at the block of the high water mark
    assert_eq!(chain.queries().last(), Some(&(200..=205)));

    chain.emit(added_at(COUNTER, (206, 0, 0), 1, 7));
    assert_next_event!(stream, (206, 0, 0));

    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    assert_eq!(report.observed, 7);
    Ok(())
}

#[tokio::test]
async fn redelivery_after_reconnect_is_suppressed() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (1, 0, 0), 1, 1));
    assert_next_event!(stream, (1, 0, 0));

    chain.kill_connections();
    chain.record(added_at(COUNTER, (2, 0, 0), 1, 2));
    assert_next_notification!(stream, Notification::Disconnected);
    assert_next_event!(stream, (2, 0, 0));
    assert_next_notification!(stream, Notification::SwitchingToLive);

    // the node pushes what the reconcile pass already delivered
    chain.push(added_at(COUNTER, (1, 0, 0), 1, 1));
    chain.push(added_at(COUNTER, (2, 0, 0), 1, 2));
    chain.emit(added_at(COUNTER, (3, 0, 0), 1, 3));
    assert_next_event!(stream, (3, 0, 0));

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_disconnects_never_lose_entries() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    for block in 1..=5 {
        chain.record(added_at(COUNTER, (block, 0, 0), 1, block));
        chain.kill_connections();
        assert_next_notification!(stream, Notification::Disconnected);
        assert_next_event!(stream, (block, 0, 0));
        await_live_again(&mut stream).await;
    }

    assert_eq!(handle.ledger().len(), 5);
    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    Ok(())
}

#[tokio::test]
async fn shutdown_while_reconnecting_ends_the_run() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (8, 0, 0), 1, 1));
    assert_next_event!(stream, (8, 0, 0));

    chain.set_offline(true);
    chain.kill_connections();
    assert_next_notification!(stream, Notification::Disconnected);

    let report = tokio::time::timeout(Duration::from_secs(5), handle.shutdown()).await??;

    assert_eq!(report.high_water_mark, Position::new(8, 0, 0));
    // the final pass cannot reach the node either
    assert!(matches!(report.final_pass, Err(IngestError::TransportFailure(_))));
    assert!(!report.is_clean());
    assert_closed!(stream);
    Ok(())
}

#[tokio::test]
async fn pushes_lost_to_a_full_subscription_buffer_are_reconciled() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.set_push_capacity(2);
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    // emitted back to back, before the ingestor gets to read any of them
    for block in 1..=5 {
        chain.emit(added_at(COUNTER, (block, 0, 0), 1, block));
    }

    assert_next_notification!(stream, Notification::Disconnected);
    for block in 1..=5 {
        assert_next_event!(stream, (block, 0, 0));
    }
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert_eq!(chain.connect_count(), 2);

    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    assert_eq!(report.observed, 5);
    Ok(())
}

#[tokio::test]
async fn connection_state_shows_the_reconnect_attempt() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert_eq!(handle.connection_state(), ConnectionState::Open);

    let mut changes = handle.connection_state_changes();
    chain.set_connect_delay(Duration::from_millis(100));
    chain.kill_connections();

    tokio::time::timeout(
        Duration::from_secs(5),
        changes.wait_for(|state| *state == ConnectionState::Connecting),
    )
    .await??;
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|state| state.is_open()))
        .await??;
    await_live_again(&mut stream).await;

    handle.shutdown().await?;
    assert_eq!(*changes.borrow(), ConnectionState::Closed);
    Ok(())
}
