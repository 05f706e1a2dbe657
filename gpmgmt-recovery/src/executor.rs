//! Worker Pool
//!
//! Runs submitted commands with:
//! - At most `batch_size` commands in flight
//! - Per-command result capture (a failure never cancels siblings)
//! - A join barrier returning results in submission order

use futures::future::join_all;
use gpmgmt_core::{ErrorStage, RecoveryResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::command::{run_recorded, ClusterCommand};

/// Executor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Overall outcome of a joined batch
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl ExecutionSummary {
    pub fn from_results(results: &[RecoveryResult], duration: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            succeeded,
            failed: results.len() - succeeded,
            duration,
        }
    }

    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / total as f64) * 100.0
        }
    }

    /// Summary string
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed in {:?} ({:.1}% success rate)",
            self.succeeded,
            self.failed,
            self.duration,
            self.success_rate()
        )
    }
}

struct Submitted {
    name: String,
    dbid: Option<i32>,
    handle: JoinHandle<RecoveryResult>,
}

/// Bounded-concurrency command runner
pub struct WorkerPool {
    batch_size: usize,
    /// Permits for in-flight commands
    semaphore: Arc<Semaphore>,
    submitted: Vec<Submitted>,
    started: Instant,
}

impl WorkerPool {
    /// Create a pool running at most `batch_size` commands at once
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ExecutorError::InvalidBatchSize);
        }

        Ok(Self {
            batch_size,
            semaphore: Arc::new(Semaphore::new(batch_size)),
            submitted: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of commands submitted and not yet joined
    pub fn pending(&self) -> usize {
        self.submitted.len()
    }

    /// Queue a command; it starts once a slot is free
    pub fn submit(&mut self, mut command: Box<dyn ClusterCommand>) {
        let name = command.name();
        let dbid = command.dbid();
        let semaphore = self.semaphore.clone();
        let task_name = name.clone();

        if self.submitted.is_empty() {
            self.started = Instant::now();
        }

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    return RecoveryResult::failed(
                        task_name,
                        dbid,
                        ErrorStage::DefaultError,
                        "worker pool closed",
                    );
                }
            };
            run_recorded(command.as_mut()).await
        });

        self.submitted.push(Submitted { name, dbid, handle });
    }

    /// Wait for every submitted command and return results in submission order
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn join(&mut self) -> Vec<RecoveryResult> {
        let submitted = std::mem::take(&mut self.submitted);
        if submitted.is_empty() {
            return Vec::new();
        }

        info!(commands = submitted.len(), "Waiting for submitted commands");

        let (identities, handles): (Vec<_>, Vec<_>) = submitted
            .into_iter()
            .map(|s| ((s.name, s.dbid), s.handle))
            .unzip();

        let results: Vec<RecoveryResult> = join_all(handles)
            .await
            .into_iter()
            .zip(identities)
            .map(|(joined, (name, dbid))| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(command = %name, error = %e, "Command panicked");
                    RecoveryResult::failed(name, dbid, ErrorStage::DefaultError, e.to_string())
                }
            })
            .collect();

        let summary = ExecutionSummary::from_results(&results, self.started.elapsed());
        info!(summary = %summary.summary(), "All commands finished");

        results
    }
}
