#![allow(dead_code)]

use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, LogData, address};
use event_ingestor::{
    EventIngestorBuilder, IngestorHandle, IngestorResult, Message, Notification, Position,
    decoder::SampleCounterDecoder, test_utils::MockChain,
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

pub const COUNTER: Address = address!("0x00000000000000000000000000000000000000c0");

/// Builder with probe and reconnect timings short enough for tests.
pub fn fast_builder() -> EventIngestorBuilder {
    EventIngestorBuilder::new(COUNTER)
        .connect_timeout(Duration::from_millis(200))
        .probe_interval(Duration::from_millis(50))
        .probe_timeout(Duration::from_millis(50))
        .reconnect_delays(Duration::from_millis(10), Duration::from_millis(50))
}

pub async fn start_ingestor(
    chain: &MockChain,
    builder: EventIngestorBuilder,
) -> anyhow::Result<(IngestorHandle, ReceiverStream<IngestorResult>)> {
    let ingestor = builder.connect(chain.connector(), SampleCounterDecoder).await?;
    Ok(ingestor.start())
}

/// A log of `COUNTER` whose signature no decoder knows.
pub fn unknown_log_at(position: impl Into<Position>) -> alloy::rpc::types::Log {
    event_ingestor::test_utils::log_at(
        COUNTER,
        position,
        LogData::new_unchecked(vec![B256::repeat_byte(0xab)], Bytes::new()),
    )
}

/// Skips any `Disconnected` notifications until the stream switches back to live delivery.
pub async fn await_live_again(stream: &mut ReceiverStream<IngestorResult>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Notification(Notification::SwitchingToLive))) => return,
                Some(Ok(Message::Notification(Notification::Disconnected))) => {}
                other => panic!("Expected SwitchingToLive, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for SwitchingToLive");
}

/// Waits until the high water mark reaches `block`.
pub async fn await_block(handle: &IngestorHandle, block: u64) {
    let mut changes = handle.high_water_mark_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|hwm| hwm.block_number >= block))
        .await
        .expect("timed out waiting for the high water mark")
        .expect("ingestor stopped");
}
