//! Commands run by the worker pool
//!
//! A command carries its own stage tag. [`run_recorded`] is the single place
//! failures are caught: it reads the tag after a failure and turns the error
//! into a [`RecoveryResult`], so one command's failure never reaches the
//! batch driver.

use async_trait::async_trait;
use gpmgmt_core::{ErrorStage, RecoveryResult};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error};

/// Failure of a single stage inside a command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", describe_exit(.code))]
    Exited {
        program: String,
        /// `None` when the process was killed by a signal
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote command on {host} failed: {message}")]
    Remote { host: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;

impl CommandError {
    pub fn exited(
        program: impl Into<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        CommandError::Exited {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "signal".to_string(),
    }
}

/// A unit of work submitted to the worker pool
#[async_trait]
pub trait ClusterCommand: Send {
    /// Human-readable name, used as the result's identity
    fn name(&self) -> String;

    /// Segment this command acts on, if any
    fn dbid(&self) -> Option<i32> {
        None
    }

    /// Stage the command is currently in
    fn stage(&self) -> ErrorStage;

    /// Perform the command's side effects, failing at the first error
    async fn run(&mut self) -> Result<()>;
}

/// Run a command and record its outcome instead of propagating failure
pub async fn run_recorded<C>(command: &mut C) -> RecoveryResult
where
    C: ClusterCommand + ?Sized,
{
    let name = command.name();
    let dbid = command.dbid();

    match command.run().await {
        Ok(()) => {
            debug!(command = %name, "Command succeeded");
            RecoveryResult::succeeded(name, dbid)
        }
        Err(e) => {
            let stage = command.stage();
            error!(command = %name, dbid = ?dbid, stage = %stage, error = %e, "Command failed");
            RecoveryResult::failed(name, dbid, stage, e.to_string())
        }
    }
}
