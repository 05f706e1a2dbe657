//! Recovery task descriptions and result records

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{ErrorStage, GpMgmtError, Result};

/// One segment's recovery task.
///
/// Built by the coordinator-side tooling and handed to the segment host as
/// JSON. The recovery command only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryInfo {
    /// Data directory to rebuild
    pub target_datadir: PathBuf,
    /// Host of the healthy peer to copy from
    pub source_hostname: String,
    /// Port of the healthy peer
    pub source_port: u16,
    /// Database instance id of the segment being recovered
    pub target_segment_dbid: i32,
    /// Port the recovered segment listens on
    pub target_port: u16,
    /// Where copy/rewind progress output is written
    pub progress_file: PathBuf,
    /// Full copy (true) or incremental rewind (false)
    pub is_full_recovery: bool,
}

/// Which recovery state machine variant a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    Full,
    Incremental,
}

impl RecoveryInfo {
    pub fn kind(&self) -> RecoveryKind {
        if self.is_full_recovery {
            RecoveryKind::Full
        } else {
            RecoveryKind::Incremental
        }
    }

    /// Parse the JSON list passed to the segment-side recovery driver
    pub fn list_from_json(json: &str) -> Result<Vec<RecoveryInfo>> {
        let infos: Vec<RecoveryInfo> = serde_json::from_str(json)?;
        validate_recovery_infos(&infos)?;
        Ok(infos)
    }
}

/// Reject lists in which two tasks target the same dbid
pub fn validate_recovery_infos(infos: &[RecoveryInfo]) -> Result<()> {
    let mut seen = HashSet::with_capacity(infos.len());
    for info in infos {
        if !seen.insert(info.target_segment_dbid) {
            return Err(GpMgmtError::DuplicateDbid(info.target_segment_dbid));
        }
    }
    Ok(())
}

/// Outcome of one command run through the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Name of the command that produced this result
    pub command: String,
    /// Segment the command acted on, if it was a per-segment command
    pub dbid: Option<i32>,
    pub success: bool,
    /// Stage active when the command failed
    pub stage: ErrorStage,
    pub message: String,
}

impl RecoveryResult {
    pub fn succeeded(command: impl Into<String>, dbid: Option<i32>) -> Self {
        Self {
            command: command.into(),
            dbid,
            success: true,
            stage: ErrorStage::DefaultError,
            message: String::new(),
        }
    }

    pub fn failed(
        command: impl Into<String>,
        dbid: Option<i32>,
        stage: ErrorStage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            dbid,
            success: false,
            stage,
            message: message.into(),
        }
    }
}
