//! Error types for the management tooling
//!
//! Provides the pipeline stage taxonomy attached to recovery results and a
//! unified error type for model validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, GpMgmtError>;

/// Pipeline stage active when a recovery command failed.
///
/// This is a classification carried next to the failure message, not an
/// error type of its own. The serialized form is the upper-case tag the
/// coordinator-side tooling parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStage {
    /// Before any stage started, or unclassified
    #[default]
    DefaultError,
    /// Full physical copy from the source segment
    BasebackupError,
    /// Incremental resynchronization from the source segment
    RewindError,
    /// Rewriting the port in postgresql.conf
    UpdateError,
    /// Starting the recovered segment
    StartError,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::DefaultError => "DEFAULT_ERROR",
            ErrorStage::BasebackupError => "BASEBACKUP_ERROR",
            ErrorStage::RewindError => "REWIND_ERROR",
            ErrorStage::UpdateError => "UPDATE_ERROR",
            ErrorStage::StartError => "START_ERROR",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the shared model
#[derive(Error, Debug)]
pub enum GpMgmtError {
    // ===== Topology Errors =====
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Segment content {primary} has mirror with content {mirror}")]
    ContentMismatch { primary: i32, mirror: i32 },

    // ===== Recovery Errors =====
    #[error("Duplicate recovery task for dbid {0}")]
    DuplicateDbid(i32),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GpMgmtError {
    fn from(err: serde_json::Error) -> Self {
        GpMgmtError::Serialization(err.to_string())
    }
}
