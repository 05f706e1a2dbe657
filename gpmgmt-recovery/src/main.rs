//! Segment recovery driver
//!
//! Runs on a segment host. Recovers every segment listed in the
//! JSON-encoded recovery list, at most `--batch-size` at a time, and reports
//! failures to the coordinator as JSON on stderr.

use anyhow::Context;
use clap::Parser;
use gpmgmt_core::RecoveryInfo;
use gpmgmt_recovery::executor::ExecutionSummary;
use gpmgmt_recovery::logging::init_logging;
use gpmgmt_recovery::{
    build_recovery_commands, failure_records, report, run_recovery_batch, ProcessTools, ToolConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "gpsegrecovery")]
#[command(about = "Recover segments on this host from their healthy peers")]
struct Cli {
    /// JSON list of recovery tasks
    #[arg(short = 'c', long = "confinfo")]
    confinfo: String,

    /// Maximum recoveries in flight (defaults to the configured batch size)
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// Overwrite the target directory on the first base backup attempt
    #[arg(short = 'f', long)]
    force_overwrite: bool,

    /// Cluster era passed to started segments
    #[arg(long)]
    era: String,

    /// Directory for the log file (stdout when absent)
    #[arg(short = 'l', long)]
    log_dir: Option<PathBuf>,

    /// TOML configuration file (environment when absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let guard = init_logging("gpsegrecovery", cli.verbose, cli.log_dir.as_deref());

    let config = match &cli.config {
        Some(path) => ToolConfig::from_file(path),
        None => ToolConfig::from_env(),
    }
    .context("Failed to load configuration")?;

    let infos = RecoveryInfo::list_from_json(&cli.confinfo).context("Invalid recovery list")?;
    let batch_size = cli.batch_size.unwrap_or(config.batch_size);

    info!(
        segments = infos.len(),
        batch_size = batch_size,
        force_overwrite = cli.force_overwrite,
        era = %cli.era,
        "Starting segment recovery"
    );

    let tools = Arc::new(ProcessTools::new(&config));
    let commands = build_recovery_commands(
        infos.clone(),
        cli.force_overwrite,
        &cli.era,
        &config.replication_slot_name,
        tools,
    );

    let start = Instant::now();
    let results = run_recovery_batch(commands, batch_size).await?;
    let summary = ExecutionSummary::from_results(&results, start.elapsed());
    info!(summary = %summary.summary(), "Segment recovery complete");

    let failures = failure_records(&infos, &results);
    if failures.is_empty() {
        return Ok(());
    }

    for failure in &failures {
        error!(
            dbid = failure.dbid,
            stage = %failure.error_type,
            error = %failure.error_msg,
            "Segment recovery failed"
        );
    }
    eprintln!("{}", report::to_json(&failures)?);

    drop(guard);
    std::process::exit(1);
}
