use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use alloy::{
    primitives::{Address, B256, LogData, TxHash, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use tokio::sync::broadcast;

use crate::{
    IngestError, Position,
    contract::ISampleCounter,
    remote::{Connector, LogStream, PushStream, RemoteLink},
    scheduler::{Operation, Submitter},
};

const STALL_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Pushes a subscriber may leave unread before it starts losing them.
const DEFAULT_PUSH_CAPACITY: usize = 1024;

/// Deterministic transaction hash for a position, so tests can tell logs apart by hash.
#[must_use]
pub fn tx_hash_at(position: Position) -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[16..24].copy_from_slice(&position.block_number.to_be_bytes());
    bytes[24..].copy_from_slice(&position.transaction_index.to_be_bytes());
    B256::from(bytes)
}

/// Builds an RPC log emitted by `address` at `position`.
#[must_use]
pub fn log_at(address: Address, position: impl Into<Position>, data: LogData) -> Log {
    let position = position.into();
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(position.block_number),
        transaction_index: Some(position.transaction_index),
        log_index: Some(position.log_index),
        transaction_hash: Some(tx_hash_at(position)),
        ..Default::default()
    }
}

/// An `Added(amount, total)` log of the sample counter contract.
#[must_use]
pub fn added_at(address: Address, position: impl Into<Position>, amount: u64, total: u64) -> Log {
    let event = ISampleCounter::Added { amount: U256::from(amount), total: U256::from(total) };
    log_at(address, position, event.encode_log_data())
}

#[derive(Debug)]
struct Subscriber {
    link_id: u64,
    address: Address,
    sender: broadcast::Sender<Log>,
}

#[derive(Debug)]
struct ChainState {
    head: u64,
    logs: Vec<Log>,
    subscribers: Vec<Subscriber>,
    generation: u64,
    next_link_id: u64,
    connects: u64,
    offline: bool,
    stalled: bool,
    drop_pushes: bool,
    null_answers: usize,
    queries: Vec<RangeInclusive<u64>>,
    push_capacity: usize,
    query_delay: Duration,
    connect_delay: Duration,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            head: 0,
            logs: Vec::new(),
            subscribers: Vec::new(),
            generation: 0,
            next_link_id: 0,
            connects: 0,
            offline: false,
            stalled: false,
            drop_pushes: false,
            null_answers: 0,
            queries: Vec::new(),
            push_capacity: DEFAULT_PUSH_CAPACITY,
            query_delay: Duration::ZERO,
            connect_delay: Duration::ZERO,
        }
    }
}

impl ChainState {
    fn deliver(&mut self, log: &Log) {
        let address = log.inner.address;
        // receivers that are gone are pruned here
        self.subscribers
            .retain(|sub| sub.address != address || sub.sender.send(log.clone()).is_ok());
    }

    fn append(&mut self, log: Log) {
        if let Some(block) = log.block_number {
            self.head = self.head.max(block);
        }
        self.logs.push(log);
    }
}

/// In-memory stand-in for a node: a log history, a head block and push subscribers.
///
/// Cloning shares the same chain.
#[derive(Clone, Debug, Default)]
pub struct MockChain {
    inner: Arc<Mutex<ChainState>>,
}

impl MockChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn connector(&self) -> MockConnector {
        MockConnector { chain: self.clone() }
    }

    #[must_use]
    pub fn head(&self) -> u64 {
        self.state().head
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Adds `log` to the history and pushes it to live subscribers, unless pushes are dropped.
    pub fn emit(&self, log: Log) {
        let mut state = self.state();
        if !state.drop_pushes {
            state.deliver(&log);
        }
        state.append(log);
    }

    /// Adds `log` to the history without pushing it, as if the push was lost.
    pub fn record(&self, log: Log) {
        self.state().append(log);
    }

    /// Pushes `log` to live subscribers without touching the history, as a redelivery would.
    pub fn push(&self, log: Log) {
        self.state().deliver(&log);
    }

    /// Appends `data` as the only log of a new block on top of the head and returns the block.
    pub fn mine(&self, address: Address, data: LogData, transaction_hash: TxHash) -> u64 {
        let mut state = self.state();
        let block = state.head + 1;
        let mut log = log_at(address, Position::from_block(block), data);
        log.transaction_hash = Some(transaction_hash);
        if !state.drop_pushes {
            state.deliver(&log);
        }
        state.append(log);
        block
    }

    /// Resets every open connection: their push streams end and their calls fail.
    pub fn kill_connections(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.subscribers.clear();
    }

    /// While offline, connection attempts are refused.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// While stalled, head block requests do not answer until the stall is lifted.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// While set, new logs reach the history but are never pushed.
    pub fn set_drop_pushes(&self, drop_pushes: bool) {
        self.state().drop_pushes = drop_pushes;
    }

    /// Subscriptions opened from now on buffer at most `capacity` unread pushes. Older unread
    /// pushes are overwritten and the subscriber sees a lag.
    pub fn set_push_capacity(&self, capacity: usize) {
        self.state().push_capacity = capacity.max(1);
    }

    /// Log queries started from now on take `delay` to answer. They are recorded in
    /// [`queries`](Self::queries) as soon as they start.
    pub fn set_query_delay(&self, delay: Duration) {
        self.state().query_delay = delay;
    }

    /// Connection attempts started from now on take `delay` to complete.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    /// The next `count` log queries answer `null` instead of a list.
    pub fn answer_next_queries_with_null(&self, count: usize) {
        self.state().null_answers = count;
    }

    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.state().connects
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Block ranges of every log query answered so far.
    #[must_use]
    pub fn queries(&self) -> Vec<RangeInclusive<u64>> {
        self.state().queries.clone()
    }
}

#[derive(Clone, Debug)]
pub struct MockConnector {
    chain: MockChain,
}

impl Connector for MockConnector {
    type Link = MockLink;

    async fn connect(&self) -> Result<MockLink, IngestError> {
        let delay = self.chain.state().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.chain.state();
        if state.offline {
            return Err(IngestError::TransportFailure("connection refused".into()));
        }
        state.connects += 1;
        state.next_link_id += 1;

        Ok(MockLink {
            chain: self.chain.clone(),
            id: state.next_link_id,
            generation: state.generation,
            released: AtomicBool::new(false),
        })
    }
}

#[derive(Debug)]
pub struct MockLink {
    chain: MockChain,
    id: u64,
    generation: u64,
    released: AtomicBool,
}

impl MockLink {
    fn check_alive(&self, state: &ChainState) -> Result<(), IngestError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(IngestError::TransportFailure("link already disconnected".into()));
        }
        if state.generation != self.generation {
            return Err(IngestError::TransportFailure("connection reset by peer".into()));
        }
        Ok(())
    }
}

impl RemoteLink for MockLink {
    async fn subscribe_logs(&self, address: Address) -> Result<LogStream, IngestError> {
        let mut state = self.chain.state();
        self.check_alive(&state)?;

        let (sender, receiver) = broadcast::channel(state.push_capacity);
        state.subscribers.push(Subscriber { link_id: self.id, address, sender });
        Ok(Box::pin(PushStream::new(receiver)))
    }

    async fn get_logs(
        &self,
        address: Address,
        blocks: RangeInclusive<u64>,
    ) -> Result<Option<Vec<Log>>, IngestError> {
        let delay = {
            let mut state = self.chain.state();
            self.check_alive(&state)?;
            state.queries.push(blocks.clone());
            state.query_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.chain.state();
        self.check_alive(&state)?;
        if state.null_answers > 0 {
            state.null_answers -= 1;
            return Ok(None);
        }

        let mut logs: Vec<Log> = state
            .logs
            .iter()
            .filter(|log| log.inner.address == address)
            .filter(|log| log.block_number.is_some_and(|block| blocks.contains(&block)))
            .cloned()
            .collect();
        logs.sort_by_key(Position::of);
        Ok(Some(logs))
    }

    async fn block_number(&self) -> Result<u64, IngestError> {
        loop {
            {
                let state = self.chain.state();
                self.check_alive(&state)?;
                if !state.stalled {
                    return Ok(state.head);
                }
            }
            tokio::time::sleep(STALL_POLL_INTERVAL).await;
        }
    }

    async fn disconnect(&self) {
        self.released.store(true, Ordering::SeqCst);
        let id = self.id;
        self.chain.state().subscribers.retain(|sub| sub.link_id != id);
    }
}

#[derive(Debug, Default)]
struct SubmitterState {
    nonce: u64,
    total: u64,
    pending: HashMap<TxHash, Operation>,
    failures_left: usize,
}

/// Submits counter operations by mining their logs straight into a [`MockChain`].
#[derive(Debug)]
pub struct MockSubmitter {
    chain: MockChain,
    address: Address,
    state: Mutex<SubmitterState>,
}

impl MockSubmitter {
    #[must_use]
    pub fn new(chain: &MockChain, address: Address) -> Self {
        Self { chain: chain.clone(), address, state: Mutex::default() }
    }

    /// The next `count` submissions are rejected.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_left = count;
    }

    /// Counter value after every accepted operation.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lock().total
    }

    fn lock(&self) -> MutexGuard<'_, SubmitterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Submitter for MockSubmitter {
    async fn submit(&self, operation: Operation) -> Result<TxHash, IngestError> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(IngestError::Submission("nonce too low".into()));
        }
        state.nonce += 1;
        let hash = B256::left_padding_from(&state.nonce.to_be_bytes());
        state.pending.insert(hash, operation);
        Ok(hash)
    }

    async fn await_acceptance(&self, operation_id: TxHash) -> Result<u64, IngestError> {
        let data = {
            let mut state = self.lock();
            let operation = state.pending.remove(&operation_id).ok_or_else(|| {
                IngestError::Submission(format!("unknown transaction {operation_id}"))
            })?;
            match operation {
                Operation::Increase(amount) => {
                    state.total += amount;
                    ISampleCounter::Added { amount: U256::from(amount), total: U256::from(state.total) }
                        .encode_log_data()
                }
                Operation::Decrease(amount) => {
                    state.total = state.total.saturating_sub(amount);
                    ISampleCounter::Subtracted {
                        amount: U256::from(amount),
                        total: U256::from(state.total),
                    }
                    .encode_log_data()
                }
            }
        };
        Ok(self.chain.mine(self.address, data, operation_id))
    }
}
