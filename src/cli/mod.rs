//! Command-line interface for exset.
//!
//! Provides commands for running build requests, checking job status,
//! computing fingerprints, replaying captured builder logs and showing
//! the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, OrchestratorConfig};
use crate::core::{calculate_hash, JobOrchestrator, JobReport, LogForwarder, TracingLogSink};
use crate::domain::{Build, DataStandard, Job, JobId, JobRequest, JobState};

/// exset - Exchange-set build orchestrator
#[derive(Parser, Debug)]
#[command(name = "exset")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit logs and command output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: nearest .exset/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit and run one or more build requests
    Run {
        /// Request files (JSON)
        #[arg(required = true)]
        requests: Vec<PathBuf>,
    },

    /// Show the state of a job
    Status {
        /// Job ID
        job_id: String,
    },

    /// Print the product discriminant and fingerprint of a request
    Fingerprint {
        /// Request file (JSON)
        request: PathBuf,
    },

    /// Replay a captured builder log file
    ReplayLogs {
        /// File with one JSON record per line
        file: PathBuf,

        /// Job the logs belong to
        #[arg(long)]
        job_id: String,

        /// Data standard of the build (S57, S100)
        #[arg(long)]
        standard: DataStandard,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let json = self.json;
        let config = match &self.config {
            Some(path) => config::load_from(path)?,
            None => config::config()?.clone(),
        };

        match self.command {
            Commands::Run { requests } => run_requests(config, &requests, json).await,
            Commands::Status { job_id } => show_status(config, &job_id, json).await,
            Commands::Fingerprint { request } => show_fingerprint(&request, json),
            Commands::ReplayLogs {
                file,
                job_id,
                standard,
            } => replay_logs(&config, &file, &job_id, standard),
            Commands::Config => show_config(&config, json),
        }
    }
}

fn read_request(path: &Path) -> Result<JobRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request: {}", path.display()))?;

    JobRequest::from_json(&content)
        .with_context(|| format!("Failed to parse request: {}", path.display()))
}

/// Submit every request, then run them concurrently
async fn run_requests(config: OrchestratorConfig, paths: &[PathBuf], json: bool) -> Result<()> {
    let requests = paths
        .iter()
        .map(|p| read_request(p))
        .collect::<Result<Vec<_>>>()?;

    let orchestrator = Arc::new(JobOrchestrator::open(config).await?);

    let mut job_ids = Vec::with_capacity(requests.len());
    for request in &requests {
        job_ids.push(orchestrator.submit(request).await?.id);
    }

    let results = orchestrator.run_jobs(job_ids).await;
    let mut failed = 0;

    if !json {
        println!("{:<38} {:<12} {:<22} {:<10}", "JOB ID", "STATE", "SAGA", "BUILDER");
        println!("{}", "-".repeat(86));
    }

    for (job_id, result) in &results {
        match result {
            Ok(report) => {
                if report.final_state != JobState::Completed {
                    failed += 1;
                }
                print_report(report, json)?;
            }
            Err(e) => {
                failed += 1;
                if json {
                    println!("{}", serde_json::json!({ "job_id": job_id, "error": format!("{:#}", e) }));
                } else {
                    println!("{:<38} error: {:#}", job_id, e);
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} job(s) did not complete", failed, results.len());
    }

    Ok(())
}

fn print_report(report: &JobReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    let builder = serde_json::to_value(&report.builder)?;
    let outcome = builder
        .get("outcome")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    println!(
        "{:<38} {:<12} {:<22} {:<10}",
        report.job_id.to_string(),
        report.final_state.to_string(),
        report.saga.status.to_string(),
        outcome
    );
    Ok(())
}

/// Show the state of a job
async fn show_status(config: OrchestratorConfig, job_id: &str, json: bool) -> Result<()> {
    let orchestrator = JobOrchestrator::open(config).await?;
    let job_id = JobId::from(job_id);

    let job = orchestrator
        .get_job(&job_id)
        .await?
        .with_context(|| format!("Job not found: {}", job_id))?;
    let memento = orchestrator.get_memento(&job_id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "job": job, "memento": memento }))?
        );
        return Ok(());
    }

    println!("Job ID: {}", job.id);
    println!("State: {}", job.state);
    println!("Data standard: {}", job.data_standard);
    println!("Batch: {}", job.batch_id.as_deref().unwrap_or("(none)"));
    println!("Correlation ID: {}", job.correlation_id);
    println!("Accepted: {}", job.timestamp);
    println!("Products: {}", job.requested_products.join(", "));

    if let Some(memento) = memento {
        println!("\nBuilder exit: {}", memento.builder_exit_code);
        println!("Builder steps:");
        for step in &memento.builder_steps {
            match &step.error_message {
                Some(msg) => println!("  {}: {} ({})", step.node_id, step.status, msg),
                None => println!("  {}: {}", step.node_id, step.status),
            }
        }
    }

    Ok(())
}

/// Print the discriminant and fingerprint of a request
fn show_fingerprint(path: &Path, json: bool) -> Result<()> {
    let request = read_request(path)?;
    let job = Job::from_request(&request);
    let build = Build::for_job(&job, request.products.clone());

    let discriminant = build.get_product_discriminant();
    let fingerprint = calculate_hash(&discriminant);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "data_standard": build.data_standard(),
                "discriminant": discriminant,
                "fingerprint": fingerprint,
            })
        );
    } else {
        println!("Data standard: {}", build.data_standard());
        println!("Products: {}", build.get_product_delimited_list());
        println!("Discriminant: {}", discriminant);
        println!("Fingerprint: {}", fingerprint);
    }

    Ok(())
}

/// Replay a captured log file through the configured logger
fn replay_logs(config: &OrchestratorConfig, path: &Path, job_id: &str, standard: DataStandard) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file: {}", path.display()))?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();

    let forwarder = LogForwarder::new(Arc::new(TracingLogSink), config.replay_level());
    let forwarded = forwarder.forward_logs(&lines, standard, &JobId::from(job_id));

    eprintln!("Replayed {} of {} line(s)", forwarded, lines.len());
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &OrchestratorConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("exset configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", config.home.display());
    println!("  Database: {}", config.database_path().display());
    println!("  Batches:  {}", config.batches_dir().display());
    println!();
    println!("Builder:");
    println!("  Image:          {}", config.builder.image);
    println!("  Runtime:        {}", config.builder.runtime_binary);
    println!("  Timeout:        {}s", config.builder.timeout_seconds);
    println!("  Start timeout:  {}s", config.builder.start_timeout_seconds);
    println!("  Poll interval:  {}s", config.builder.poll_interval_seconds);
    println!();
    println!("Saga:");
    println!("  Deadline:       {}s", config.saga.timeout_seconds);
    println!("  Deduplication:  {}", config.saga.deduplication_enabled);
    println!("  Replay level:   {}", config.saga.replay_log_level);
    println!();
    println!("Callback timeout: {}s", config.callback.timeout_seconds);
    println!("Max concurrent jobs: {}", config.max_concurrent_jobs);

    Ok(())
}
