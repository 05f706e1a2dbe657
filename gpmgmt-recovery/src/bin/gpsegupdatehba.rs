//! Adds the standby coordinator's trust entries to this host's segments
//!
//! Invoked remotely by the standby pg_hba distribution pass. Directories
//! whose pg_hba.conf already carries the entries are left untouched.

use anyhow::Context;
use clap::Parser;
use gpmgmt_recovery::logging::init_logging;
use gpmgmt_recovery::{apply_pg_hba, PgHbaBlock};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "gpsegupdatehba")]
#[command(about = "Merge standby coordinator entries into segment pg_hba.conf files")]
struct Cli {
    /// Segment data directories on this host
    #[arg(long, num_args = 1.., required = true)]
    data_dirs: Vec<PathBuf>,

    /// Base64-encoded pg_hba block
    #[arg(long)]
    entries: String,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging("gpsegupdatehba", cli.verbose, None);

    let block = PgHbaBlock::from_base64(&cli.entries).context("Failed to decode entries")?;
    let written = apply_pg_hba(&block, &cli.data_dirs).context("Failed to update pg_hba.conf")?;

    info!(
        updated = written.len(),
        unchanged = cli.data_dirs.len() - written.len(),
        "pg_hba.conf update complete"
    );

    Ok(())
}
