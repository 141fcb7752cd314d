//! Tempo CLI - config-driven job runner.
//!
//! Loads a jobs config document (plus an optional default job assembled
//! from flags), wraps each entry in a shell-command job, and runs the
//! manager until interrupted.

mod shell;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use tempo_core::config::{Config, JobConfig};
use tempo_core::events::LoggingListener;
use tempo_core::jobs::JobManager;
use tempo_core::telemetry;

/// Tempo - background job scheduling engine
#[derive(Parser)]
#[command(
    name = "tempo",
    version = "0.1.0",
    about = "Tempo - background job scheduling engine",
    long_about = "Runs jobs from a config document on their schedules, with \
                  timeouts, cancellation, and bounded invocation history."
)]
struct Cli {
    /// The jobs config path
    #[arg(long, default_value = "tempo.yml")]
    config: PathBuf,

    /// The name of the default job
    #[arg(long)]
    name: Option<String>,

    /// The command to execute as the default job
    #[arg(long)]
    exec: Option<String>,

    /// The default job schedule (cron expression or `@every <duration>`)
    #[arg(long)]
    schedule: Option<String>,

    /// The default job timeout (e.g. `30s`, `10m`)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Discard default job output
    #[arg(long)]
    discard_output: bool,

    /// Trailing command for the default job (after `--`)
    #[arg(last = true)]
    command: Vec<String>,
}

impl Cli {
    /// The job assembled from flags, when a command was given.
    fn default_job(&self) -> Option<JobConfig> {
        if self.exec.is_none() && self.command.is_empty() {
            return None;
        }
        Some(JobConfig {
            name: self.name.clone().unwrap_or_else(|| "default".to_string()),
            exec: self.exec.clone(),
            command: self.command.clone(),
            schedule: self.schedule.clone(),
            timeout: self.timeout,
            discard_output: self.discard_output,
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("tempo: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config.to_string_lossy())
            .with_context(|| format!("reading config {}", cli.config.display()))?
    } else {
        Config::default()
    };

    if let Some(default_job) = cli.default_job() {
        config.jobs.push(default_job);
    }
    if config.jobs.is_empty() {
        bail!(
            "no jobs configured; supply a command with `--exec=...` or `-- command`, \
             or provide a jobs config file"
        );
    }

    let manager = JobManager::from_config(&config);
    manager.bus().listen_all("logging", Arc::new(LoggingListener));

    for job_config in &config.jobs {
        let job = shell::ShellJob::from_config(job_config)?;
        tracing::info!(
            job = %job_config.name,
            schedule = job_config.schedule.as_deref().unwrap_or("(on demand)"),
            "loading job"
        );
        manager.load_job(job)?;
    }

    manager.start().await?;
    tracing::info!(jobs = manager.len(), "tempo running; press ctrl-c to exit");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    tracing::info!("shutting down");
    manager.cancel_all();
    manager.stop().await?;
    Ok(())
}
