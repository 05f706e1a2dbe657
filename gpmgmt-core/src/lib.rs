//! Greenplum Management Core Library
//!
//! Shared types for the segment recovery and standby configuration tooling.
//! This crate provides:
//! - The pipeline stage taxonomy used to classify recovery failures
//! - Recovery task descriptions and per-command result records
//! - The cluster topology model (segments, primary and mirror endpoints)
//! - Common error handling

pub mod error;
pub mod recovery_info;
pub mod topology;

pub use error::{ErrorStage, GpMgmtError, Result};
pub use recovery_info::{validate_recovery_infos, RecoveryInfo, RecoveryKind, RecoveryResult};
pub use topology::{ClusterTopology, Segment, SegmentEndpoint, SegmentRole};

/// Name of the replication slot mirrors stream from.
pub const INTERNAL_REPLICATION_SLOT: &str = "internal_wal_replication_slot";

/// Server configuration file inside a segment data directory.
pub const POSTGRESQL_CONF: &str = "postgresql.conf";

/// Host-based authentication file inside a segment data directory.
pub const PG_HBA_CONF: &str = "pg_hba.conf";
