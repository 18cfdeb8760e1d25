use alloy::{dyn_abi::DynSolValue, primitives::U256};
use event_ingestor::{
    IngestorState, Notification, Position, assert_empty, assert_next_event,
    assert_next_notification, test_utils::{MockChain, added_at},
};

use crate::common::{COUNTER, fast_builder, start_ingestor};

#[tokio::test]
async fn reconciled_entries_are_not_emitted_again_when_pushed() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.record(added_at(COUNTER, (100, 0, 0), 1, 1));
    chain.record(added_at(COUNTER, (101, 2, 0), 2, 3));

    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().from_position((100, 0, 0))).await?;

    let first = assert_next_event!(stream, (100, 0, 0));
    assert_eq!(first.name, "Added");
    assert_eq!(
        first.args,
        vec![DynSolValue::Uint(U256::from(1), 256), DynSolValue::Uint(U256::from(1), 256)]
    );
    assert_next_event!(stream, (101, 2, 0));
    assert_next_notification!(stream, Notification::SwitchingToLive);

    // redelivery of an entry the reconciliation pass already emitted
    chain.push(added_at(COUNTER, (101, 2, 0), 2, 3));
    chain.emit(added_at(COUNTER, (102, 0, 0), 4, 7));

    assert_next_event!(stream, (102, 0, 0));
    assert_eq!(handle.high_water_mark(), Position::new(102, 0, 0));
    assert_eq!(handle.ledger().len(), 3);

    let stream = assert_empty!(stream);
    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    assert_eq!(report.observed, 3);
    drop(stream);
    Ok(())
}

#[tokio::test]
async fn null_reconciliation_answer_still_goes_live() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.record(added_at(COUNTER, (3, 0, 0), 1, 1));
    chain.answer_next_queries_with_null(1);

    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;

    // nothing is emitted for the unverified pass
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert_eq!(handle.state(), IngestorState::Live);

    chain.emit(added_at(COUNTER, (4, 0, 0), 1, 2));
    assert_next_event!(stream, (4, 0, 0));

    // the final pass from (4, 0, 0) does not reach back to block 3
    let report = handle.shutdown().await?;
    assert!(report.is_clean());
    Ok(())
}

#[tokio::test]
async fn other_addresses_are_ignored() -> anyhow::Result<()> {
    let other = alloy::primitives::address!("0x00000000000000000000000000000000000000ff");
    let chain = MockChain::new();
    chain.record(added_at(other, (1, 0, 0), 1, 1));

    let (handle, mut stream) = start_ingestor(&chain, fast_builder()).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.emit(added_at(other, (2, 0, 0), 1, 2));
    chain.emit(added_at(COUNTER, (3, 0, 0), 1, 1));
    assert_next_event!(stream, (3, 0, 0));

    assert_eq!(handle.ledger().len(), 1);
    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn entries_before_the_start_are_never_emitted() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.record(added_at(COUNTER, (50, 0, 0), 1, 1));
    chain.record(added_at(COUNTER, (50, 3, 0), 1, 2));
    chain.record(added_at(COUNTER, (51, 0, 0), 1, 3));

    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().from_position((50, 3, 0))).await?;

    assert_next_event!(stream, (50, 3, 0));
    assert_next_event!(stream, (51, 0, 0));
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert!(!handle.ledger().contains(&Position::new(50, 0, 0)));

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn large_gaps_are_queried_in_chunks() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.record(added_at(COUNTER, (5, 0, 0), 1, 1));
    chain.record(added_at(COUNTER, (250, 0, 0), 1, 2));

    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().max_block_range(100)).await?;

    assert_next_event!(stream, (5, 0, 0));
    assert_next_event!(stream, (250, 0, 0));
    assert_next_notification!(stream, Notification::SwitchingToLive);
    assert_eq!(chain.queries(), vec![0..=99, 100..=199, 200..=250]);

    handle.shutdown().await?;
    Ok(())
}
