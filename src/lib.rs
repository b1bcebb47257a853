// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod task;
pub mod transport;
pub mod types;

use anyhow::{Result, anyhow, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::model::ConfigFile;
use crate::config::{build_jobs, load_and_validate};
use crate::engine::{
    Distributor, DistributorSettings, Job, Runtime, RuntimeEvent, RuntimeOptions, RuntimeReport,
};
use crate::transport::{SimNetwork, TokioTimers};
use crate::types::JobResult;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the simulated network and tokio timers
/// - distributor + runtime
/// - Ctrl-C handling
///
/// Fails if any job did not finish with success.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    let mut settings = cfg.settings;
    if let Some(n) = args.executors {
        settings.executor_count = usize::from(n);
    }

    if args.dry_run {
        print_dry_run(&cfg, &settings);
        return Ok(());
    }

    let jobs = build_jobs(&cfg)?;
    let total = jobs.len();

    // Runtime event channel shared by the network, the timers and Ctrl-C.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

    let network = SimNetwork::new(cfg.simulation.clone(), cfg.sim_nodes.clone(), rt_tx.clone());
    let timers = TokioTimers::new(rt_tx.clone());
    let mut distributor = Distributor::new(network, timers, settings);

    for job in jobs {
        distributor
            .submit_job(job)
            .map_err(|e| anyhow!("cannot submit job: {e}"))?;
    }
    info!(
        jobs = total,
        executors = settings.executor_count,
        "jobs submitted"
    );

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }
    drop(rt_tx);

    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let report = Runtime::new(distributor, rt_rx, options).run().await?;

    print_report(&report);

    let succeeded = report
        .finished
        .iter()
        .filter(|job| job.result() == JobResult::Success)
        .count();
    if succeeded < total {
        bail!("{} of {} jobs did not succeed", total - succeeded, total);
    }
    Ok(())
}

fn print_job(job: &Job) {
    let retries = job.retry_stats();
    println!(
        "  - {}: {} (busy retries: {}, communication retries: {})",
        job,
        job.result(),
        retries.busy_retries,
        retries.communication_retries
    );
    for (id, task, state) in job.tasks().iter() {
        println!("      [{}] {:?}: {}", id.index(), state, task.describe());
    }
}

fn print_report(report: &RuntimeReport) {
    println!("meshconf report");
    println!("finished ({}):", report.finished.len());
    for job in &report.finished {
        print_job(job);
    }
    if !report.unfinished.is_empty() {
        println!("unfinished ({}):", report.unfinished.len());
        for job in &report.unfinished {
            print_job(job);
        }
    }
    if !report.rejected.is_empty() {
        println!("rejected ({}):", report.rejected.len());
        for job in &report.rejected {
            println!("  - {job}");
        }
    }
}

/// Dry-run output: settings, simulated nodes, jobs and task links.
fn print_dry_run(cfg: &ConfigFile, settings: &DistributorSettings) {
    println!("meshconf dry-run");
    println!("  config.executor_count = {}", settings.executor_count);
    println!(
        "  config.local_retry_max = {}",
        settings.executor.local_retry_max
    );
    println!(
        "  config.communication_retry_max = {}",
        settings.executor.communication_retry_max
    );
    println!(
        "  config.busy_retry_interval = {:?}",
        settings.executor.busy_retry_interval
    );
    println!("  config.event_timeout = {:?}", settings.executor.event_timeout);
    println!();

    if !cfg.sim_nodes.is_empty() {
        println!("simulated nodes ({}):", cfg.sim_nodes.len());
        for node in &cfg.sim_nodes {
            println!("  - {} cid=0x{:04x}", node.destination, node.company_id);
            if !node.reject.is_empty() {
                println!("      reject: {:?}", node.reject);
            }
        }
        println!();
    }

    println!("jobs ({}):", cfg.jobs.len());
    for job in &cfg.jobs {
        println!("  - {} ({})", job.name, job.destination);
        for task in &job.tasks {
            println!("      {}: {}", task.name, task.request);
            if let Some(next) = task.on_success {
                println!("        on_success: {}", job.tasks[next].name);
            }
            if let Some(fallback) = task.on_failure {
                println!("        on_failure: {}", job.tasks[fallback].name);
            }
        }
    }

    debug!("dry-run complete (nothing sent)");
}
