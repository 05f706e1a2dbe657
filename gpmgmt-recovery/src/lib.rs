//! Greenplum Segment Recovery Library
//!
//! This crate provides segment-side recovery and standby configuration
//! distribution for Greenplum clusters:
//! - Recovery state machine (full base backup or incremental rewind, then
//!   port update and mirror start) with stage-tagged failures
//! - Bounded worker pool that records per-command results
//! - Standby coordinator pg_hba block generation and idempotent merge
//! - Fleet distribution of pg_hba entries, one command per reachable host

pub mod command;
pub mod conf;
pub mod config;
pub mod distribution;
pub mod executor;
pub mod logging;
pub mod pg_hba;
pub mod recovery;
pub mod remote;
pub mod report;
pub mod tools;

// Re-export main types
pub use command::{run_recorded, ClusterCommand, CommandError};
pub use config::{ConfigError, ToolConfig};
pub use distribution::{
    plan_host_updates, unreachable_host_warning, DistributionError, DistributionPlan,
    DistributionReport, HostPlan, StandbyHbaDistributor, UpdateHbaCommand,
};
pub use executor::{ExecutionSummary, ExecutorError, WorkerPool};
pub use pg_hba::{
    apply_pg_hba, standby_pg_hba_block, update_pg_hba, AddressLister, CurrentUserResolver, HbaError,
    HostAddressLister, IdentityResolver, LocalAddressLister, PgHbaBlock, RemoteAddressLister,
};
pub use recovery::{build_recovery_commands, run_recovery_batch, RecoveryCommand, RecoveryMode};
pub use remote::{RemoteShell, SshShell};
pub use report::{failure_records, SegmentErrorRecord};
pub use tools::{ProcessTools, SegmentTools};
