//! Periodic counter operations used to drive the ingestor end to end.
//!
//! Every cycle increases the counter by a random amount in `1..=max_increase`, waits
//! `step_interval`, decreases it by a random amount no larger than the increase, and waits again.
//! Submission and acceptance times are recorded in an [`AcceptanceLog`] shared with the ingestor.

use std::{
    fmt::{self, Display},
    future::Future,
    time::Duration,
};

use alloy::{
    primitives::{Address, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    IngestError,
    acceptance::{AcceptanceLog, OperationRecord},
    contract::ISampleCounter,
};

pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MONITORING_DURATION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_INCREASE: u64 = 10;
pub const DEFAULT_ACCEPTANCE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Increase(u64),
    Decrease(u64),
}

impl Operation {
    #[must_use]
    pub fn amount(self) -> u64 {
        match self {
            Operation::Increase(amount) | Operation::Decrease(amount) => amount,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Increase(amount) => write!(f, "ADD {amount}"),
            Operation::Decrease(amount) => write!(f, "SUB {amount}"),
        }
    }
}

/// Submits operations to the remote system.
pub trait Submitter: Send + Sync + 'static {
    /// Sends `operation` and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Submission`] if the operation was rejected.
    fn submit(
        &self,
        operation: Operation,
    ) -> impl Future<Output = Result<TxHash, IngestError>> + Send;

    /// Waits until the operation is accepted and returns the block it was accepted in.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation failed or acceptance could not be observed.
    fn await_acceptance(
        &self,
        operation_id: TxHash,
    ) -> impl Future<Output = Result<u64, IngestError>> + Send;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub step_interval: Duration,
    pub monitoring_duration: Duration,
    pub max_increase: u64,
    pub acceptance_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            step_interval: DEFAULT_STEP_INTERVAL,
            monitoring_duration: DEFAULT_MONITORING_DURATION,
            max_increase: DEFAULT_MAX_INCREASE,
            acceptance_timeout: DEFAULT_ACCEPTANCE_TIMEOUT,
        }
    }
}

/// What the scheduler did during its run.
#[derive(Clone, Debug, Default)]
pub struct SchedulerReport {
    /// Cycles started, including aborted ones.
    pub cycles: usize,
    /// Records of every accepted operation, in submission order.
    pub accepted: Vec<OperationRecord>,
    /// One entry per aborted cycle.
    pub failures: Vec<IngestError>,
}

impl SchedulerReport {
    /// Highest block any accepted operation landed in.
    #[must_use]
    pub fn last_accepted_block(&self) -> Option<u64> {
        self.accepted.iter().filter_map(|record| record.accepted_block).max()
    }
}

pub struct OperationScheduler<S> {
    submitter: S,
    acceptance: AcceptanceLog,
    config: SchedulerConfig,
    rng: StdRng,
}

impl<S: Submitter> OperationScheduler<S> {
    #[must_use]
    pub fn new(submitter: S, acceptance: AcceptanceLog) -> Self {
        Self {
            submitter,
            acceptance,
            config: SchedulerConfig::default(),
            rng: StdRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Makes the random amounts reproducible.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn acceptance_log(&self) -> &AcceptanceLog {
        &self.acceptance
    }

    /// Submits `operation`, waits for its acceptance and records both times.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Submission`] if the submitter rejected the operation.
    /// * [`IngestError::Timeout`] if it was not accepted within `acceptance_timeout`.
    pub async fn execute(&self, operation: Operation) -> Result<OperationRecord, IngestError> {
        info!(%operation, "Submitting operation");
        let operation_id = self.submitter.submit(operation).await?;
        self.acceptance.record_submitted(operation_id, operation);
        debug!(%operation, %operation_id, "Operation submitted");

        let block =
            timeout(self.config.acceptance_timeout, self.submitter.await_acceptance(operation_id))
                .await??;
        let accepted_at = self.acceptance.record_accepted(operation_id, block);
        info!(%operation, %operation_id, block, ?accepted_at, "Operation accepted");

        self.acceptance
            .get(&operation_id)
            .ok_or_else(|| IngestError::Submission(format!("no record for {operation_id}")))
    }

    /// Runs cycles until `monitoring_duration` has elapsed or `cancel` fires.
    ///
    /// An operation in progress at the deadline is allowed to finish. A failed operation aborts
    /// its cycle only.
    pub async fn run(&mut self, cancel: &CancellationToken) -> SchedulerReport {
        let deadline = Instant::now() + self.config.monitoring_duration;
        let mut report = SchedulerReport::default();
        info!(
            monitoring_secs = self.config.monitoring_duration.as_secs(),
            step_interval_secs = self.config.step_interval.as_secs(),
            "Operation scheduler started"
        );

        while Instant::now() < deadline && !cancel.is_cancelled() {
            report.cycles += 1;
            if let Err(e) = self.cycle(deadline, cancel, &mut report).await {
                error!(cycle = report.cycles, error = %e, "Operation cycle aborted");
                report.failures.push(e);
                self.pause(deadline, cancel).await;
            }
        }

        info!(
            cycles = report.cycles,
            accepted = report.accepted.len(),
            failures = report.failures.len(),
            "Operation scheduler finished"
        );
        report
    }

    async fn cycle(
        &mut self,
        deadline: Instant,
        cancel: &CancellationToken,
        report: &mut SchedulerReport,
    ) -> Result<(), IngestError> {
        let increase = self.rng.gen_range(1..=self.config.max_increase.max(1));
        report.accepted.push(self.execute(Operation::Increase(increase)).await?);
        if !self.pause(deadline, cancel).await {
            return Ok(());
        }

        let decrease = self.rng.gen_range(1..=increase);
        report.accepted.push(self.execute(Operation::Decrease(decrease)).await?);
        self.pause(deadline, cancel).await;
        Ok(())
    }

    /// Waits one step, cut short by the deadline or cancellation. Returns whether time remains.
    async fn pause(&self, deadline: Instant, cancel: &CancellationToken) -> bool {
        let until = (Instant::now() + self.config.step_interval).min(deadline);
        tokio::select! {
            () = cancel.cancelled() => false,
            () = sleep_until(until) => Instant::now() < deadline,
        }
    }
}

/// Submits `add`/`sub` calls to the sample counter contract with a local private key.
#[derive(Clone, Debug)]
pub struct ContractSubmitter {
    contract: ISampleCounter::ISampleCounterInstance<DynProvider>,
    poll_interval: Duration,
}

impl ContractSubmitter {
    /// Connects to `http_url` with a wallet for `private_key`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Submission`] if the key is malformed, or the connection error.
    pub async fn connect(
        http_url: &str,
        private_key: &str,
        contract: Address,
    ) -> Result<Self, IngestError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| IngestError::Submission(format!("invalid private key: {e}")))?;
        info!(signer = %signer.address(), %http_url, "Connecting signing provider");

        let provider = ProviderBuilder::new().wallet(signer).connect(http_url).await?.erased();
        Ok(Self::new(provider, contract))
    }

    #[must_use]
    pub fn new(provider: DynProvider, contract: Address) -> Self {
        Self {
            contract: ISampleCounter::new(contract, provider),
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Submitter for ContractSubmitter {
    async fn submit(&self, operation: Operation) -> Result<TxHash, IngestError> {
        let amount = U256::from(operation.amount());
        let sent = match operation {
            Operation::Increase(_) => self.contract.add(amount).send().await,
            Operation::Decrease(_) => self.contract.sub(amount).send().await,
        };
        let pending =
            sent.map_err(|e| IngestError::Submission(format!("{operation} rejected: {e}")))?;
        Ok(*pending.tx_hash())
    }

    async fn await_acceptance(&self, operation_id: TxHash) -> Result<u64, IngestError> {
        let provider = self.contract.provider();
        loop {
            if let Some(receipt) = provider.get_transaction_receipt(operation_id).await? {
                if !receipt.status() {
                    return Err(IngestError::Submission(format!("{operation_id} reverted")));
                }
                return receipt.block_number.ok_or_else(|| {
                    IngestError::Submission(format!("{operation_id} has no block number"))
                });
            }
            debug!(%operation_id, "Waiting for receipt");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
