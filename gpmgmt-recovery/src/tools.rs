//! Segment tools used by the recovery state machine
//!
//! [`SegmentTools`] is the seam between the state machine and the
//! outside world. [`ProcessTools`] drives the real Greenplum binaries.

use async_trait::async_trait;
use gpmgmt_core::RecoveryInfo;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::command::{CommandError, Result};
use crate::conf::{modify_conf_setting, ConfValueType};
use crate::config::ToolConfig;

/// Full physical copy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseBackupRequest {
    pub target_datadir: PathBuf,
    pub source_host: String,
    pub source_port: u16,
    pub create_slot: bool,
    pub replication_slot_name: String,
    pub force_overwrite: bool,
    pub target_dbid: i32,
    pub progress_file: PathBuf,
}

impl BaseBackupRequest {
    pub fn new(
        info: &RecoveryInfo,
        replication_slot_name: &str,
        create_slot: bool,
        force_overwrite: bool,
    ) -> Self {
        Self {
            target_datadir: info.target_datadir.clone(),
            source_host: info.source_hostname.clone(),
            source_port: info.source_port,
            create_slot,
            replication_slot_name: replication_slot_name.to_string(),
            force_overwrite,
            target_dbid: info.target_segment_dbid,
            progress_file: info.progress_file.clone(),
        }
    }
}

/// Diverged-history resynchronization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindRequest {
    pub target_datadir: PathBuf,
    pub source_host: String,
    pub source_port: u16,
    pub replication_slot_name: String,
    pub target_dbid: i32,
    pub progress_file: PathBuf,
}

impl RewindRequest {
    pub fn new(info: &RecoveryInfo, replication_slot_name: &str) -> Self {
        Self {
            target_datadir: info.target_datadir.clone(),
            source_host: info.source_hostname.clone(),
            source_port: info.source_port,
            replication_slot_name: replication_slot_name.to_string(),
            target_dbid: info.target_segment_dbid,
            progress_file: info.progress_file.clone(),
        }
    }
}

/// Mode the started segment runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorMode {
    Mirror,
}

/// Segment start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub port: u16,
    pub data_directory: PathBuf,
    pub dbid: i32,
    pub mirror_mode: MirrorMode,
    /// Started outside cluster-wide content accounting
    pub utility_mode: bool,
    pub num_contents_in_cluster: i32,
    /// Correlation token passed to the server environment
    pub era: String,
}

impl StartRequest {
    /// Start request for a freshly recovered mirror
    pub fn recovered_mirror(info: &RecoveryInfo, era: &str) -> Self {
        Self {
            port: info.target_port,
            data_directory: info.target_datadir.clone(),
            dbid: info.target_segment_dbid,
            mirror_mode: MirrorMode::Mirror,
            utility_mode: true,
            num_contents_in_cluster: 0,
            era: era.to_string(),
        }
    }

    pub fn description(&self) -> String {
        format!("Starting new segment with dbid {}:", self.dbid)
    }
}

/// External collaborators of a recovery command
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentTools: Send + Sync {
    async fn base_backup(&self, request: &BaseBackupRequest) -> Result<()>;

    async fn rewind(&self, request: &RewindRequest) -> Result<()>;

    async fn modify_conf_setting(
        &self,
        path: &Path,
        key: &str,
        value: &str,
        value_type: ConfValueType,
    ) -> Result<()>;

    async fn start_segment(&self, request: &StartRequest) -> Result<()>;
}

/// Runs the Greenplum binaries under `$GPHOME/bin`
#[derive(Debug, Clone)]
pub struct ProcessTools {
    gphome: PathBuf,
    start_timeout: Duration,
}

impl ProcessTools {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            gphome: config.gphome.clone(),
            start_timeout: config.start_timeout(),
        }
    }

    fn binary(&self, name: &str) -> PathBuf {
        self.gphome.join("bin").join(name)
    }

    pub fn base_backup_args(request: &BaseBackupRequest) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            "fast".to_string(),
            "-D".to_string(),
            request.target_datadir.display().to_string(),
            "-h".to_string(),
            request.source_host.clone(),
            "-p".to_string(),
            request.source_port.to_string(),
        ];
        if request.create_slot {
            args.push("--create-slot".to_string());
        }
        args.extend([
            "--slot".to_string(),
            request.replication_slot_name.clone(),
            "--wal-method".to_string(),
            "stream".to_string(),
            "--write-recovery-conf".to_string(),
            "--target-gp-dbid".to_string(),
            request.target_dbid.to_string(),
        ]);
        if request.force_overwrite {
            args.push("--force-overwrite".to_string());
        }
        args.extend(["--progress".to_string(), "--verbose".to_string()]);
        args
    }

    pub fn rewind_args(request: &RewindRequest) -> Vec<String> {
        vec![
            "--write-recovery-conf".to_string(),
            format!("--slot={}", request.replication_slot_name),
            format!(
                "--source-server=host={} port={} dbname=template1",
                request.source_host, request.source_port
            ),
            format!("--target-pgdata={}", request.target_datadir.display()),
            "--progress".to_string(),
        ]
    }

    pub fn pg_ctl_args(request: &StartRequest, timeout: Duration) -> Vec<String> {
        let mut options = format!(" -p {}", request.port);
        if request.utility_mode {
            options.push_str(" -c gp_role=utility");
        }
        options.push(' ');

        vec![
            "-D".to_string(),
            request.data_directory.display().to_string(),
            "-l".to_string(),
            request.data_directory.join("log").join("startup.log").display().to_string(),
            "-w".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            "-o".to_string(),
            options,
            "start".to_string(),
        ]
    }
}

#[async_trait]
impl SegmentTools for ProcessTools {
    #[instrument(
        skip(self, request),
        fields(dbid = request.target_dbid, create_slot = request.create_slot)
    )]
    async fn base_backup(&self, request: &BaseBackupRequest) -> Result<()> {
        let mut cmd = Command::new(self.binary("pg_basebackup"));
        cmd.args(Self::base_backup_args(request));
        run_with_progress(&mut cmd, "pg_basebackup", &request.progress_file).await
    }

    #[instrument(skip(self, request), fields(dbid = request.target_dbid))]
    async fn rewind(&self, request: &RewindRequest) -> Result<()> {
        let mut cmd = Command::new(self.binary("pg_rewind"));
        cmd.args(Self::rewind_args(request));
        run_with_progress(&mut cmd, "pg_rewind", &request.progress_file).await
    }

    async fn modify_conf_setting(
        &self,
        path: &Path,
        key: &str,
        value: &str,
        value_type: ConfValueType,
    ) -> Result<()> {
        let owned_path = path.to_path_buf();
        let (key, value) = (key.to_string(), value.to_string());
        tokio::task::spawn_blocking(move || {
            modify_conf_setting(&owned_path, &key, &value, value_type)
        })
        .await
        .map_err(|e| CommandError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?
    }

    #[instrument(skip(self, request), fields(dbid = request.dbid, port = request.port))]
    async fn start_segment(&self, request: &StartRequest) -> Result<()> {
        debug!(
            mirror_mode = ?request.mirror_mode,
            num_contents_in_cluster = request.num_contents_in_cluster,
            era = %request.era,
            "Starting segment"
        );
        let mut cmd = Command::new(self.binary("pg_ctl"));
        cmd.args(Self::pg_ctl_args(request, self.start_timeout))
            .env("GPSESSID", "0000000000")
            .env("GPERA", &request.era);
        run_captured(&mut cmd, "pg_ctl").await.map(|_| ())
    }
}

/// Run a process with stdout and stderr sent to `progress_file`
pub(crate) async fn run_with_progress(
    cmd: &mut Command,
    program: &str,
    progress_file: &Path,
) -> Result<()> {
    let progress = tokio::fs::File::create(progress_file)
        .await
        .map_err(|e| CommandError::Io {
            path: progress_file.to_path_buf(),
            source: e,
        })?
        .into_std()
        .await;
    let progress_err = progress.try_clone().map_err(|e| CommandError::Io {
        path: progress_file.to_path_buf(),
        source: e,
    })?;

    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(progress))
        .stderr(Stdio::from(progress_err))
        .status()
        .await
        .map_err(|e| CommandError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(CommandError::exited(
            program,
            status.code(),
            format!("see {}", progress_file.display()),
        ))
    }
}

/// Run a process and return its stdout
pub(crate) async fn run_captured(cmd: &mut Command, program: &str) -> Result<String> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| CommandError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(CommandError::exited(
            program,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}
