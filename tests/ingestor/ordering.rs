use event_ingestor::{
    IngestError, Notification, Position, assert_next_error, assert_next_event,
    assert_next_notification, test_utils::{MockChain, added_at},
};

use crate::common::{COUNTER, fast_builder, start_ingestor, unknown_log_at};

#[tokio::test]
async fn late_entries_are_flagged_before_emission() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (105, 0, 0), 1, 1));
    assert_next_event!(stream, (105, 0, 0));

    chain.emit(added_at(COUNTER, (103, 1, 0), 1, 2));
    assert_next_notification!(
        stream,
        Notification::OutOfOrder {
            position: Position::new(103, 1, 0),
            high_water_mark: Position::new(105, 0, 0),
        }
    );
    assert_next_event!(stream, (103, 1, 0));

    // the high water mark never moves backwards
    assert_eq!(handle.high_water_mark(), Position::new(105, 0, 0));

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn live_entries_arrive_in_push_order() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(COUNTER, (7, 0, 0), 1, 1));
    chain.emit(added_at(COUNTER, (7, 0, 1), 1, 2));
    chain.emit(added_at(COUNTER, (7, 2, 0), 1, 3));

    assert_next_event!(stream, (7, 0, 0));
    assert_next_event!(stream, (7, 0, 1));
    assert_next_event!(stream, (7, 2, 0));

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn decode_failures_do_not_stop_the_stream() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.record(unknown_log_at((2, 0, 0)));
    chain.record(added_at(COUNTER, (3, 0, 0), 1, 1));

    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;

    assert_next_error!(
        stream,
        IngestError::Decode { position: Position::new(2, 0, 0), reason: String::new() }
    );
    assert_next_event!(stream, (3, 0, 0));
    assert_next_notification!(stream, Notification::SwitchingToLive);

    // a failed decode still counts as observed
    assert!(handle.ledger().contains(&Position::new(2, 0, 0)));

    chain.emit(unknown_log_at((4, 0, 0)));
    assert_next_error!(
        stream,
        IngestError::Decode { position: Position::new(4, 0, 0), reason: String::new() }
    );
    assert_eq!(handle.high_water_mark(), Position::new(4, 0, 0));

    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    Ok(())
}
