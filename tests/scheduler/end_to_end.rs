use std::time::Duration;

use event_ingestor::{
    GapReconciler, Message, Notification, Position, assert_next_notification,
    acceptance::AcceptanceLog,
    audit::cross_check,
    scheduler::{Operation, OperationScheduler, SchedulerConfig, Submitter},
    test_utils::{MockChain, MockSubmitter},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::common::{COUNTER, await_block, await_live_again, fast_builder, start_ingestor};

fn short_run() -> SchedulerConfig {
    SchedulerConfig {
        step_interval: Duration::from_millis(20),
        monitoring_duration: Duration::from_millis(200),
        max_increase: 10,
        acceptance_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn every_accepted_operation_is_observed_exactly_once() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let acceptance = AcceptanceLog::new();
    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().acceptance_log(acceptance.clone())).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    let submitter = MockSubmitter::new(&chain, COUNTER);
    let mut scheduler =
        OperationScheduler::new(submitter, acceptance.clone()).config(short_run()).seed(11);
    let report = scheduler.run(&CancellationToken::new()).await;

    assert!(report.failures.is_empty());
    assert!(report.accepted.len() >= 2);
    assert_eq!(acceptance.len(), report.accepted.len());
    await_block(&handle, chain.head()).await;

    let audit = cross_check(
        &chain.connector(),
        &GapReconciler::default(),
        COUNTER,
        Position::from_block(0),
        &handle.ledger(),
    )
    .await?;
    assert!(audit.is_clean());
    assert_eq!(audit.checked, report.accepted.len());

    let shutdown = handle.shutdown().await?;
    assert!(shutdown.is_clean());

    let mut names = Vec::new();
    while let Some(item) = stream.next().await {
        if let Message::Event(event) = item? {
            let delay = event
                .transaction_hash
                .and_then(|hash| acceptance.delay_since_accepted(&hash, event.observed_at));
            assert!(delay.is_some());
            names.push(event.name);
        }
    }
    let expected: Vec<&str> = report
        .accepted
        .iter()
        .map(|record| match record.operation {
            Operation::Increase(_) => "Added",
            Operation::Decrease(_) => "Subtracted",
        })
        .collect();
    assert_eq!(names, expected);
    Ok(())
}

#[tokio::test]
async fn lost_pushes_are_reported_then_recovered_by_a_reconnect() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let acceptance = AcceptanceLog::new();
    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().acceptance_log(acceptance.clone())).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    chain.set_drop_pushes(true);
    let mut scheduler = OperationScheduler::new(MockSubmitter::new(&chain, COUNTER), acceptance)
        .config(SchedulerConfig { monitoring_duration: Duration::from_millis(60), ..short_run() });
    let report = scheduler.run(&CancellationToken::new()).await;
    chain.set_drop_pushes(false);
    assert!(!report.accepted.is_empty());

    let reconciler = GapReconciler::default();
    let before = cross_check(
        &chain.connector(),
        &reconciler,
        COUNTER,
        Position::from_block(0),
        &handle.ledger(),
    )
    .await?;
    assert_eq!(before.missed.len(), report.accepted.len());

    chain.kill_connections();
    assert_next_notification!(stream, Notification::Disconnected);
    await_block(&handle, chain.head()).await;

    let after = cross_check(
        &chain.connector(),
        &reconciler,
        COUNTER,
        Position::from_block(0),
        &handle.ledger(),
    )
    .await?;
    assert!(after.is_clean());

    for _ in 0..report.accepted.len() {
        assert!(matches!(stream.next().await, Some(Ok(Message::Event(_)))));
    }
    await_live_again(&mut stream).await;

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn cross_check_waits_for_the_last_accepted_block() -> anyhow::Result<()> {
    let chain = MockChain::new();
    let acceptance = AcceptanceLog::new();
    let (handle, mut stream) =
        start_ingestor(&chain, fast_builder().acceptance_log(acceptance.clone())).await?;
    assert_next_notification!(stream, Notification::SwitchingToLive);

    let config = short_run();
    let mut scheduler = OperationScheduler::new(MockSubmitter::new(&chain, COUNTER), acceptance)
        .config(config)
        .seed(5);
    let report = scheduler.run(&CancellationToken::new()).await;
    let last = report.last_accepted_block().ok_or_else(|| anyhow::anyhow!("nothing accepted"))?;
    assert_eq!(last, chain.head());

    assert!(handle.wait_for_block(last, config.step_interval * 10).await);
    let audit = cross_check(
        &chain.connector(),
        &GapReconciler::default(),
        COUNTER,
        Position::from_block(0),
        &handle.ledger(),
    )
    .await?;
    assert!(audit.is_clean());

    // a block the ingestor never sees is given up on after the limit
    chain.set_drop_pushes(true);
    let submitter = MockSubmitter::new(&chain, COUNTER);
    let hash = submitter.submit(Operation::Increase(1)).await?;
    let unseen = submitter.await_acceptance(hash).await?;
    assert!(!handle.wait_for_block(unseen, config.step_interval).await);

    handle.shutdown().await?;
    Ok(())
}
