// event-monitor: drives add/sub calls against the sample counter contract while ingesting its
// events, then checks that every emitted event was observed exactly once.
//
// Exit codes: 0 when nothing was missed, 1 when events were missed or the final check could not
// run, 2 when setup failed.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use event_ingestor::{
    EventIngestorBuilder, Message, Notification, Position,
    acceptance::AcceptanceLog,
    audit::cross_check,
    config::MonitorConfig,
    decoder::SampleCounterDecoder,
    reconciler::GapReconciler,
    remote::WsConnectorBuilder,
    scheduler::{ContractSubmitter, OperationScheduler},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "event-monitor", version, about = "Exactly-once contract event monitor")]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "event-monitor.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("Setup failed: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the run finished with no missed events.
async fn run(args: Args) -> anyhow::Result<bool> {
    let config = MonitorConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let address = config.ingestor.contract_address;
    let start = Position::from_block(config.ingestor.start_block);
    info!(%address, %start, ws_url = %config.ingestor.ws_url, "Starting event monitor");

    let connector = WsConnectorBuilder::new(config.ingestor.ws_url.clone()).build();
    let reconciler = GapReconciler::new(config.ingestor.max_block_range)?;
    let acceptance = AcceptanceLog::new();

    let ingestor = EventIngestorBuilder::new(address)
        .from_position(start)
        .max_block_range(config.ingestor.max_block_range)
        .probe_interval(config.ingestor.probe_interval)
        .probe_timeout(config.ingestor.probe_timeout)
        .acceptance_log(acceptance.clone())
        .connect(connector.clone(), SampleCounterDecoder)
        .await
        .context("connecting the event ingestor")?;

    let submitter =
        ContractSubmitter::connect(&config.signer.http_url, &config.signer.private_key, address)
            .await
            .context("connecting the signing provider")?;

    let (handle, mut stream) = ingestor.start();

    let consumer = tokio::spawn(async move {
        let mut events = 0usize;
        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Event(event)) => {
                    events += 1;
                    info!(name = %event.name, position = %event.position, args = ?event.args, "Event");
                }
                Ok(Message::Notification(Notification::OutOfOrder { position, high_water_mark })) => {
                    warn!(%position, %high_water_mark, "Out-of-order event follows");
                }
                Ok(Message::Notification(notification)) => info!(?notification, "Notification"),
                Err(e) => warn!(error = %e, "Stream error"),
            }
        }
        events
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping the scheduler");
            on_interrupt.cancel();
        }
    });

    let mut scheduler =
        OperationScheduler::new(submitter, acceptance.clone()).config(config.scheduler);
    let schedule = scheduler.run(&cancel).await;
    info!(
        cycles = schedule.cycles,
        accepted = schedule.accepted.len(),
        failures = schedule.failures.len(),
        "Scheduler finished"
    );

    // the last pushes may still be in flight
    if let Some(block) = schedule.last_accepted_block() {
        if !handle.wait_for_block(block, config.scheduler.step_interval).await {
            warn!(
                block,
                high_water_mark = %handle.high_water_mark(),
                "Ingestor has not reached the last accepted block, cross-checking anyway"
            );
        }
    }

    let audit_clean = match cross_check(&connector, &reconciler, address, start, &handle.ledger()).await {
        Ok(report) => report.is_clean(),
        Err(e) => {
            error!(error = %e, "Cross-check failed");
            false
        }
    };

    let shutdown_clean = match handle.shutdown().await {
        Ok(report) => {
            info!(
                high_water_mark = %report.high_water_mark,
                observed = report.observed,
                "Ingestor shut down"
            );
            report.is_clean()
        }
        Err(e) => {
            error!(error = %e, "Ingestor task failed");
            false
        }
    };

    match consumer.await {
        Ok(events) => info!(events, "Event stream drained"),
        Err(e) => warn!(error = %e, "Consumer task failed"),
    }

    Ok(audit_clean && shutdown_clean)
}
