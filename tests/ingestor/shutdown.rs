use std::time::Duration;

use event_ingestor::{
    IngestorState, Notification, Position, assert_closed, assert_next_event,
    assert_next_notification, test_utils::{MockChain, added_at},
};

use crate::common::{COUNTER, await_block, fast_builder, start_ingestor};

#[tokio::test]
async fn shutdown_closes_the_stream_and_releases_the_transport() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert_eq!(chain.subscriber_count(), 1);

    let mut state = handle.state_changes();
    let report = handle.shutdown().await?;

    assert_eq!(*state.borrow_and_update(), IngestorState::Terminated);
    assert_eq!(report.high_water_mark, Position::default());
    assert_eq!(report.observed, 0);
    assert!(report.is_clean());
    assert_closed!(stream);
    assert_eq!(chain.subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn final_pass_reports_entries_never_delivered() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (10, 0, 0), 1, 1));
    assert_next_event!(stream, (10, 0, 0));

    chain.set_drop_pushes(true);
    chain.emit(added_at(COUNTER, (11, 0, 0), 1, 2));
    chain.emit(added_at(COUNTER, (12, 0, 0), 1, 3));

    let report = handle.shutdown().await?;

    assert!(!report.is_clean());
    let final_pass = report.final_pass.as_ref().map_err(Clone::clone)?;
    assert_eq!(final_pass.from, Position::new(10, 0, 0));
    assert_eq!(final_pass.missed, vec![Position::new(11, 0, 0), Position::new(12, 0, 0)]);
    // missed entries are reported, not emitted
    assert_closed!(stream);
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_stops_ingestion() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);
    drop(stream);

    // the ingestor notices on its next send
    chain.emit(added_at(COUNTER, (1, 0, 0), 1, 1));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    assert_eq!(handle.state(), IngestorState::Terminated);
    assert_eq!(chain.subscriber_count(), 0);
    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn dropping_the_handle_keeps_ingesting() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);
    drop(handle);

    chain.emit(added_at(COUNTER, (1, 0, 0), 1, 1));
    assert_next_event!(stream, (1, 0, 0));
    Ok(())
}

#[tokio::test]
async fn shutdown_completes_while_the_consumer_is_not_reading() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().stream_buffer_capacity(1)).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (1, 0, 0), 1, 1));
    chain.emit(added_at(COUNTER, (2, 0, 0), 1, 2));
    chain.emit(added_at(COUNTER, (3, 0, 0), 1, 3));
    // the first event fills the buffer and the second one waits for room
    await_block(&handle, 1).await;

    let report = tokio::time::timeout(Duration::from_secs(3), handle.shutdown()).await??;

    assert_eq!(report.high_water_mark, Position::new(1, 0, 0));
    assert_eq!(report.observed, 1);
    let final_pass = report.final_pass.as_ref().map_err(Clone::clone)?;
    assert_eq!(final_pass.missed, vec![Position::new(2, 0, 0), Position::new(3, 0, 0)]);

    assert_next_event!(stream, (1, 0, 0));
    assert_closed!(stream);
    Ok(())
}

#[tokio::test]
async fn pass_in_flight_is_drained_before_terminating() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.record(added_at(COUNTER, (1, 0, 0), 1, 1));
    chain.record(added_at(COUNTER, (2, 0, 0), 1, 2));
    chain.record(added_at(COUNTER, (3, 0, 0), 1, 3));
    chain.set_query_delay(Duration::from_millis(200));

    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;

    tokio::time::timeout(Duration::from_secs(5), async {
        while chain.queries().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert_eq!(handle.state(), IngestorState::Reconciling);
    chain.set_query_delay(Duration::ZERO);

    let report = handle.shutdown().await?;

    assert_eq!(report.high_water_mark, Position::new(3, 0, 0));
    assert_eq!(report.observed, 3);
    assert!(report.is_clean());

    assert_next_event!(stream, (1, 0, 0));
    assert_next_event!(stream, (2, 0, 0));
    assert_next_event!(stream, (3, 0, 0));
    // stopped before going live
    assert_closed!(stream);
    Ok(())
}
