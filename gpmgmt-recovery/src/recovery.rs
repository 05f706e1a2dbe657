//! Segment Recovery
//!
//! Rebuilds one segment's data directory from a healthy peer:
//!
//! ```text
//! INIT -> COPY -> UPDATE_CONF -> START -> DONE
//! ```
//!
//! The copy stage is a base backup (full recovery) or a rewind (incremental
//! recovery). The stage tag is set before each stage runs so that a failure
//! is attributed to it when [`run_recorded`](crate::command::run_recorded)
//! records the result.

use async_trait::async_trait;
use gpmgmt_core::{ErrorStage, RecoveryInfo, RecoveryKind, RecoveryResult, POSTGRESQL_CONF};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::command::{ClusterCommand, Result};
use crate::conf::ConfValueType;
use crate::executor::{ExecutorError, WorkerPool};
use crate::tools::{BaseBackupRequest, RewindRequest, SegmentTools, StartRequest};

/// Copy strategy of a recovery command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Base backup; `force_overwrite` applies to the first attempt only
    Full { force_overwrite: bool },
    /// Rewind, never retried
    Incremental,
}

/// Recovery state machine for one segment
pub struct RecoveryCommand {
    info: RecoveryInfo,
    mode: RecoveryMode,
    era: String,
    replication_slot_name: String,
    tools: Arc<dyn SegmentTools>,
    stage: ErrorStage,
}

impl RecoveryCommand {
    /// Create a command; the variant is fixed by `info.is_full_recovery`
    pub fn new(
        info: RecoveryInfo,
        force_overwrite: bool,
        era: impl Into<String>,
        tools: Arc<dyn SegmentTools>,
    ) -> Self {
        let mode = match info.kind() {
            RecoveryKind::Full => RecoveryMode::Full { force_overwrite },
            RecoveryKind::Incremental => RecoveryMode::Incremental,
        };

        Self {
            info,
            mode,
            era: era.into(),
            replication_slot_name: gpmgmt_core::INTERNAL_REPLICATION_SLOT.to_string(),
            tools,
            stage: ErrorStage::DefaultError,
        }
    }

    pub fn with_replication_slot(mut self, name: impl Into<String>) -> Self {
        self.replication_slot_name = name.into();
        self
    }

    pub fn info(&self) -> &RecoveryInfo {
        &self.info
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    async fn run_base_backup(&mut self, force_overwrite: bool) -> Result<()> {
        self.stage = ErrorStage::BasebackupError;
        let request = BaseBackupRequest::new(
            &self.info,
            &self.replication_slot_name,
            false,
            force_overwrite,
        );

        info!(
            "Running pg_basebackup with progress output temporarily in {}",
            self.info.progress_file.display()
        );
        if let Err(e) = self.tools.base_backup(&request).await {
            info!("Running pg_basebackup failed: {}", e);

            // A cluster that never had mirrors has no replication slot yet
            let retry = BaseBackupRequest {
                create_slot: true,
                force_overwrite: true,
                ..request
            };
            info!("Re-running pg_basebackup, creating the slot this time");
            self.tools.base_backup(&retry).await?;
        }

        self.stage = ErrorStage::DefaultError;
        info!(
            "Successfully ran pg_basebackup for dbid: {}",
            self.info.target_segment_dbid
        );
        Ok(())
    }

    async fn run_rewind(&mut self) -> Result<()> {
        info!(
            "Running pg_rewind with progress output temporarily in {}",
            self.info.progress_file.display()
        );
        self.stage = ErrorStage::RewindError;
        let request = RewindRequest::new(&self.info, &self.replication_slot_name);
        self.tools.rewind(&request).await?;
        info!(
            "Successfully ran pg_rewind for dbid: {}",
            self.info.target_segment_dbid
        );
        Ok(())
    }

    /// Stages shared by both variants once the copy succeeded
    async fn configure_and_start(&mut self) -> Result<()> {
        self.stage = ErrorStage::UpdateError;
        let conf_path = self.info.target_datadir.join(POSTGRESQL_CONF);
        info!("Updating {}", conf_path.display());
        self.tools
            .modify_conf_setting(
                &conf_path,
                "port",
                &self.info.target_port.to_string(),
                ConfValueType::Number,
            )
            .await?;

        self.stage = ErrorStage::StartError;
        let request = StartRequest::recovered_mirror(&self.info, &self.era);
        info!("{}", request.description());
        self.tools.start_segment(&request).await
    }
}

#[async_trait]
impl ClusterCommand for RecoveryCommand {
    fn name(&self) -> String {
        match self.mode {
            RecoveryMode::Full { .. } => "Run pg_basebackup".to_string(),
            RecoveryMode::Incremental => "Run pg_rewind".to_string(),
        }
    }

    fn dbid(&self) -> Option<i32> {
        Some(self.info.target_segment_dbid)
    }

    fn stage(&self) -> ErrorStage {
        self.stage
    }

    #[instrument(skip(self), fields(dbid = self.info.target_segment_dbid, mode = ?self.mode))]
    async fn run(&mut self) -> Result<()> {
        match self.mode {
            RecoveryMode::Full { force_overwrite } => self.run_base_backup(force_overwrite).await?,
            RecoveryMode::Incremental => self.run_rewind().await?,
        }
        self.configure_and_start().await
    }
}

/// Build one recovery command per task
pub fn build_recovery_commands(
    infos: Vec<RecoveryInfo>,
    force_overwrite: bool,
    era: &str,
    replication_slot_name: &str,
    tools: Arc<dyn SegmentTools>,
) -> Vec<RecoveryCommand> {
    infos
        .into_iter()
        .map(|info| {
            RecoveryCommand::new(info, force_overwrite, era, tools.clone())
                .with_replication_slot(replication_slot_name)
        })
        .collect()
}

/// Run recovery commands through a pool of `batch_size` workers
pub async fn run_recovery_batch(
    commands: Vec<RecoveryCommand>,
    batch_size: usize,
) -> std::result::Result<Vec<RecoveryResult>, ExecutorError> {
    let mut pool = WorkerPool::new(batch_size)?;
    for command in commands {
        pool.submit(Box::new(command));
    }
    Ok(pool.join().await)
}
