//! Standby pg_hba distribution
//!
//! Pushes the standby coordinator's trust entries to every segment host:
//! - One command per distinct reachable host, covering every data
//!   directory on it
//! - One warning per unreachable host, in first-encounter order
//! - Commands run through a bounded worker pool; failures are recorded per
//!   command and never abort the pass

use async_trait::async_trait;
use gpmgmt_core::{ClusterTopology, ErrorStage, RecoveryResult};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::command::{ClusterCommand, Result as CommandResult};
use crate::executor::{ExecutorError, WorkerPool};
use crate::pg_hba::{
    standby_pg_hba_block, AddressLister, HbaError, IdentityResolver, PgHbaBlock,
};
use crate::remote::RemoteShell;

/// Distribution errors raised before any command is submitted
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("Failed to build standby pg_hba entries: {0}")]
    Block(#[from] HbaError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

pub type Result<T> = std::result::Result<T, DistributionError>;

/// Data directories to update on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlan {
    pub host: String,
    pub data_dirs: Vec<PathBuf>,
}

/// Scheduling decisions for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionPlan {
    /// Reachable hosts in first-encounter order
    pub hosts: Vec<HostPlan>,
    /// Unreachable hosts in first-encounter order
    pub skipped: Vec<String>,
}

/// Outcome of one distribution pass
#[derive(Debug, Default)]
pub struct DistributionReport {
    pub scheduled: Vec<HostPlan>,
    /// Warnings emitted for unreachable hosts, in emission order
    pub warnings: Vec<String>,
    /// One result per scheduled host, in scheduling order
    pub results: Vec<RecoveryResult>,
}

impl DistributionReport {
    pub fn failed(&self) -> impl Iterator<Item = &RecoveryResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// Warning logged for a host that could not be updated
pub fn unreachable_host_warning(host: &str) -> String {
    format!(
        "Manual update of the pg_hba_conf files for all segments on unreachable host {} \
         will be required.",
        host
    )
}

/// Decide which hosts get a command.
///
/// Segments are walked in order, primary before mirror. A host is
/// unreachable when it is listed in `unreachable` or any of its endpoints is
/// flagged unreachable; it is reported once and never scheduled.
pub fn plan_host_updates(
    topology: &ClusterTopology,
    unreachable: &HashSet<String>,
) -> DistributionPlan {
    let flagged: HashSet<&str> = topology
        .endpoints()
        .filter(|e| e.unreachable)
        .map(|e| e.host.as_str())
        .collect();

    let mut plan = DistributionPlan::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for endpoint in topology.endpoints() {
        let host = endpoint.host.as_str();
        if !seen.insert(host) {
            continue;
        }

        if unreachable.contains(host) || flagged.contains(host) {
            plan.skipped.push(host.to_string());
        } else {
            plan.hosts.push(HostPlan {
                host: host.to_string(),
                data_dirs: topology.data_dirs_on_host(host),
            });
        }
    }

    plan
}

/// Runs `gpsegupdatehba` on one host for all of its data directories
pub struct UpdateHbaCommand {
    plan: HostPlan,
    block: PgHbaBlock,
    shell: Arc<dyn RemoteShell>,
    program: String,
}

impl UpdateHbaCommand {
    pub fn new(
        plan: HostPlan,
        block: PgHbaBlock,
        shell: Arc<dyn RemoteShell>,
        gphome: &std::path::Path,
    ) -> Self {
        Self {
            plan,
            block,
            shell,
            program: gphome.join("sbin").join("gpsegupdatehba").display().to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.plan.host
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--data-dirs".to_string()];
        args.extend(self.plan.data_dirs.iter().map(|d| d.display().to_string()));
        args.push("--entries".to_string());
        args.push(self.block.to_base64());
        args
    }
}

#[async_trait]
impl ClusterCommand for UpdateHbaCommand {
    fn name(&self) -> String {
        format!("Update pg_hba.conf on {}", self.plan.host)
    }

    fn stage(&self) -> ErrorStage {
        ErrorStage::DefaultError
    }

    async fn run(&mut self) -> CommandResult<()> {
        let args = self.args();
        self.shell.run(&self.plan.host, &self.program, &args).await?;
        Ok(())
    }
}

/// Distributes standby trust entries across the cluster
pub struct StandbyHbaDistributor {
    lister: Arc<dyn AddressLister>,
    identity: Arc<dyn IdentityResolver>,
    shell: Arc<dyn RemoteShell>,
    gphome: PathBuf,
}

impl StandbyHbaDistributor {
    pub fn new(
        lister: Arc<dyn AddressLister>,
        identity: Arc<dyn IdentityResolver>,
        shell: Arc<dyn RemoteShell>,
        gphome: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lister,
            identity,
            shell,
            gphome: gphome.into(),
        }
    }

    /// Run one distribution pass and wait for every command
    #[instrument(skip(self, topology, unreachable), fields(segments = topology.segments().len()))]
    pub async fn distribute(
        &self,
        topology: &ClusterTopology,
        standby_host: &str,
        batch_size: usize,
        unreachable: &[String],
    ) -> Result<DistributionReport> {
        let mut pool = WorkerPool::new(batch_size)?;
        let block =
            standby_pg_hba_block(standby_host, self.lister.as_ref(), self.identity.as_ref())
                .await?;

        let unreachable: HashSet<String> = unreachable.iter().cloned().collect();
        let plan = plan_host_updates(topology, &unreachable);

        let mut warnings = Vec::with_capacity(plan.skipped.len());
        for host in &plan.skipped {
            let message = unreachable_host_warning(host);
            warn!("{}", message);
            warnings.push(message);
        }

        info!(
            hosts = plan.hosts.len(),
            skipped = plan.skipped.len(),
            "Updating pg_hba.conf on segment hosts"
        );

        for host_plan in &plan.hosts {
            pool.submit(Box::new(UpdateHbaCommand::new(
                host_plan.clone(),
                block.clone(),
                self.shell.clone(),
                &self.gphome,
            )));
        }

        let results = pool.join().await;

        Ok(DistributionReport {
            scheduled: plan.hosts,
            warnings,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandError;
    use gpmgmt_core::{Segment, SegmentEndpoint};
    use std::sync::Mutex;

    struct FixedAddresses;

    #[async_trait]
    impl AddressLister for FixedAddresses {
        async fn list_addrs(&self, _host: &str) -> crate::pg_hba::Result<Vec<String>> {
            Ok(vec!["10.0.0.9".to_string()])
        }
    }

    struct FixedUser;

    impl IdentityResolver for FixedUser {
        fn local_user(&self) -> crate::pg_hba::Result<String> {
            Ok("gpadmin".to_string())
        }
    }

    struct NoUser;

    impl IdentityResolver for NoUser {
        fn local_user(&self) -> crate::pg_hba::Result<String> {
            Err(HbaError::Identity("unset".to_string()))
        }
    }

    /// Records every remote call; fails for hosts in `failing`
    #[derive(Default)]
    struct RecordingShell {
        calls: Mutex<Vec<(String, String, Vec<String>)>>,
        failing: HashSet<String>,
    }

    impl RecordingShell {
        fn calls(&self) -> Vec<(String, String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteShell for RecordingShell {
        async fn run(&self, host: &str, program: &str, args: &[String]) -> CommandResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((host.to_string(), program.to_string(), args.to_vec()));
            if self.failing.contains(host) {
                return Err(CommandError::Remote {
                    host: host.to_string(),
                    message: "permission denied".to_string(),
                });
            }
            Ok(String::new())
        }
    }

    /// Six segments with content ids cycling 1,2,3 on hosts seg{i} / mir{i}
    fn six_segments() -> ClusterTopology {
        ClusterTopology::new(
            (0..6)
                .map(|i| {
                    let content = (i % 3) + 1;
                    let primary_dir = format!("/tmp/d{}", i);
                    let mirror_dir = format!("/tmp/m{}", i);
                    Segment::new(
                        SegmentEndpoint::primary(format!("seg{}", i), primary_dir, content),
                        Some(SegmentEndpoint::mirror(format!("mir{}", i), mirror_dir, content)),
                    )
                    .unwrap()
                })
                .collect(),
        )
    }

    fn distributor(shell: Arc<RecordingShell>) -> StandbyHbaDistributor {
        StandbyHbaDistributor::new(
            Arc::new(FixedAddresses),
            Arc::new(FixedUser),
            shell,
            "/usr/local/gpdb",
        )
    }

    /// Formatted log output collected from a scoped subscriber
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
            let writer = self.clone();
            tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .without_time()
                .with_target(false)
                .with_max_level(tracing::Level::INFO)
                .finish()
        }

        fn warn_lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|line| line.trim_start().starts_with("WARN"))
                .map(str::to_string)
                .collect()
        }
    }

    async fn distribute_logged(unreachable: &[&str]) -> (DistributionReport, Vec<String>) {
        let logs = LogBuffer::default();
        let _default = tracing::subscriber::set_default(logs.subscriber());
        let unreachable: Vec<String> = unreachable.iter().map(|h| h.to_string()).collect();
        let report = distributor(Arc::new(RecordingShell::default()))
            .distribute(&six_segments(), "smdw", 2, &unreachable)
            .await
            .unwrap();
        (report, logs.warn_lines())
    }

    fn hosts(plan: &DistributionPlan) -> Vec<&str> {
        plan.hosts.iter().map(|h| h.host.as_str()).collect()
    }

    #[test]
    fn test_one_command_per_distinct_host() {
        let plan = plan_host_updates(&six_segments(), &HashSet::new());
        assert_eq!(plan.hosts.len(), 12);
        assert!(plan.skipped.is_empty());
        assert_eq!(&hosts(&plan)[..4], &["seg0", "mir0", "seg1", "mir1"]);
    }

    #[test]
    fn test_colocated_segments_share_one_command() {
        let topology = ClusterTopology::new(
            (0..6)
                .map(|i| {
                    let content = (i % 3) + 1;
                    let (p, m) = if i % 2 == 0 { ("sdw1", "sdw2") } else { ("sdw2", "sdw1") };
                    Segment::new(
                        SegmentEndpoint::primary(p, format!("/data/p{}", i), content),
                        Some(SegmentEndpoint::mirror(m, format!("/data/m{}", i), content)),
                    )
                    .unwrap()
                })
                .collect(),
        );

        let plan = plan_host_updates(&topology, &HashSet::new());
        assert_eq!(hosts(&plan), vec!["sdw1", "sdw2"]);
        assert_eq!(plan.hosts[0].data_dirs.len(), 6);
        assert_eq!(plan.hosts[0].data_dirs[0], PathBuf::from("/data/p0"));
        assert_eq!(plan.hosts[0].data_dirs[1], PathBuf::from("/data/m1"));
        assert_eq!(plan.hosts[1].data_dirs.len(), 6);
    }

    #[test]
    fn test_unreachable_host_skipped_once() {
        let topology = ClusterTopology::new(vec![
            Segment::new(
                SegmentEndpoint::primary("h1", "/data/p0", 0),
                Some(SegmentEndpoint::mirror("h2", "/data/m0", 0)),
            )
            .unwrap(),
            Segment::new(
                SegmentEndpoint::primary("h2", "/data/p1", 1),
                Some(SegmentEndpoint::mirror("h1", "/data/m1", 1)),
            )
            .unwrap(),
        ]);
        let unreachable: HashSet<String> = ["h1".to_string()].into_iter().collect();

        let plan = plan_host_updates(&topology, &unreachable);
        assert_eq!(plan.skipped, vec!["h1"]);
        assert_eq!(hosts(&plan), vec!["h2"]);
        assert_eq!(
            plan.hosts[0].data_dirs,
            vec![PathBuf::from("/data/m0"), PathBuf::from("/data/p1")]
        );
    }

    #[test]
    fn test_flagged_endpoint_is_unreachable() {
        let topology = ClusterTopology::new(vec![Segment::new(
            SegmentEndpoint::primary("sdw1", "/data/p0", 0),
            Some(SegmentEndpoint::mirror("sdw2", "/data/m0", 0).with_unreachable(true)),
        )
        .unwrap()]);

        let plan = plan_host_updates(&topology, &HashSet::new());
        assert_eq!(hosts(&plan), vec!["sdw1"]);
        assert_eq!(plan.skipped, vec!["sdw2"]);
    }

    #[tokio::test]
    async fn test_distribute_reachable_cluster() {
        let shell = Arc::new(RecordingShell::default());
        let report = distributor(shell.clone())
            .distribute(&six_segments(), "smdw", 1, &[])
            .await
            .unwrap();

        assert!(report.warnings.is_empty());
        assert_eq!(report.results.len(), 12);
        assert!(report.all_succeeded());

        let calls = shell.calls();
        assert_eq!(calls.len(), 12);
        let distinct: HashSet<_> = calls.iter().map(|(h, _, _)| h.clone()).collect();
        assert_eq!(distinct.len(), 12);

        let (_, program, args) = calls.iter().find(|(h, _, _)| h == "seg0").unwrap();
        assert_eq!(program, "/usr/local/gpdb/sbin/gpsegupdatehba");
        assert_eq!(args[0], "--data-dirs");
        assert_eq!(args[1], "/tmp/d0");
        assert_eq!(args[2], "--entries");
        let block = PgHbaBlock::from_base64(&args[3]).unwrap();
        assert_eq!(
            block.as_str(),
            "# standby coordinator host ip addresses\nhost\tgpadmin\tgpadmin\t10.0.0.9/32\ttrust\n"
        );
    }

    #[tokio::test]
    async fn test_unreachable_primary_warns() {
        let shell = Arc::new(RecordingShell::default());
        let report = distributor(shell.clone())
            .distribute(&six_segments(), "smdw", 1, &["seg1".to_string()])
            .await
            .unwrap();

        assert_eq!(
            report.warnings,
            vec![
                "Manual update of the pg_hba_conf files for all segments on unreachable host \
                 seg1 will be required."
            ]
        );
        assert_eq!(shell.calls().len(), 11);
        assert!(shell.calls().iter().all(|(h, _, _)| h != "seg1"));
    }

    #[tokio::test]
    async fn test_unreachable_mirror_warns() {
        let shell = Arc::new(RecordingShell::default());
        let report = distributor(shell.clone())
            .distribute(&six_segments(), "smdw", 2, &["mir1".to_string()])
            .await
            .unwrap();

        assert_eq!(report.warnings, vec![unreachable_host_warning("mir1")]);
        assert!(shell.calls().iter().all(|(h, _, _)| h != "mir1"));
    }

    #[tokio::test]
    async fn test_warnings_in_first_encounter_order() {
        let shell = Arc::new(RecordingShell::default());
        let report = distributor(shell.clone())
            .distribute(&six_segments(), "smdw", 1, &["mir1".to_string(), "seg1".to_string()])
            .await
            .unwrap();

        assert_eq!(
            report.warnings,
            vec![unreachable_host_warning("seg1"), unreachable_host_warning("mir1")]
        );
        assert_eq!(report.scheduled.len(), 10);
    }

    #[tokio::test]
    async fn test_warnings_follow_segment_order_across_segments() {
        let shell = Arc::new(RecordingShell::default());
        let report = distributor(shell.clone())
            .distribute(&six_segments(), "smdw", 1, &["mir2".to_string(), "seg1".to_string()])
            .await
            .unwrap();

        assert_eq!(
            report.warnings,
            vec![unreachable_host_warning("seg1"), unreachable_host_warning("mir2")]
        );
        assert!(shell.calls().iter().all(|(h, _, _)| h != "seg1" && h != "mir2"));
        assert_eq!(report.results.len(), 10);
    }

    #[tokio::test]
    async fn test_unreachable_host_logged_once_with_exact_text() {
        let (_, warns) = distribute_logged(&["seg1"]).await;

        assert_eq!(warns.len(), 1, "{:?}", warns);
        assert!(warns[0].ends_with(&unreachable_host_warning("seg1")), "{}", warns[0]);
    }

    #[tokio::test]
    async fn test_unreachable_hosts_logged_in_segment_order() {
        let (report, warns) = distribute_logged(&["mir2", "seg1"]).await;

        assert_eq!(warns.len(), 2, "{:?}", warns);
        assert!(warns[0].ends_with(&unreachable_host_warning("seg1")), "{}", warns[0]);
        assert!(warns[1].ends_with(&unreachable_host_warning("mir2")), "{}", warns[1]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_host_shared_by_segments_logged_once() {
        let logs = LogBuffer::default();
        let _default = tracing::subscriber::set_default(logs.subscriber());
        let topology = ClusterTopology::new(vec![
            Segment::new(
                SegmentEndpoint::primary("h1", "/data/p0", 0),
                Some(SegmentEndpoint::mirror("h2", "/data/m0", 0)),
            )
            .unwrap(),
            Segment::new(
                SegmentEndpoint::primary("h2", "/data/p1", 1),
                Some(SegmentEndpoint::mirror("h1", "/data/m1", 1)),
            )
            .unwrap(),
        ]);

        distributor(Arc::new(RecordingShell::default()))
            .distribute(&topology, "smdw", 1, &["h1".to_string()])
            .await
            .unwrap();

        let warns = logs.warn_lines();
        assert_eq!(warns.len(), 1, "{:?}", warns);
        assert!(warns[0].ends_with(&unreachable_host_warning("h1")));
    }

    #[tokio::test]
    async fn test_reachable_cluster_logs_no_warnings() {
        let (report, warns) = distribute_logged(&[]).await;

        assert!(warns.is_empty(), "{:?}", warns);
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn test_null_mirror_does_not_fault() {
        let mut segments: Vec<Segment> = six_segments().segments().to_vec();
        segments[0] = Segment::new(SegmentEndpoint::primary("seg0", "/tmp/d0", 1), None).unwrap();
        let topology = ClusterTopology::new(segments);

        let shell = Arc::new(RecordingShell::default());
        let report = distributor(shell.clone())
            .distribute(&topology, "smdw", 1, &[])
            .await
            .unwrap();

        assert_eq!(report.results.len(), 11);
        assert_eq!(report.scheduled[0].host, "seg0");
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_is_recorded_not_raised() {
        let shell = Arc::new(RecordingShell {
            failing: ["mir2".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let report = distributor(shell.clone())
            .distribute(&six_segments(), "smdw", 3, &[])
            .await
            .unwrap();

        assert_eq!(report.results.len(), 12);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].command, "Update pg_hba.conf on mir2");
        assert_eq!(failed[0].stage, ErrorStage::DefaultError);
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_block_failure_submits_nothing() {
        let shell = Arc::new(RecordingShell::default());
        let distributor = StandbyHbaDistributor::new(
            Arc::new(FixedAddresses),
            Arc::new(NoUser),
            shell.clone(),
            "/gp",
        );
        let err = distributor.distribute(&six_segments(), "smdw", 1, &[]).await.unwrap_err();
        assert!(matches!(err, DistributionError::Block(HbaError::Identity(_))));
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let shell = Arc::new(RecordingShell::default());
        let err = distributor(shell).distribute(&six_segments(), "smdw", 0, &[]).await.unwrap_err();
        assert!(matches!(err, DistributionError::Executor(ExecutorError::InvalidBatchSize)));
    }
}
