//! Recovery error report
//!
//! The coordinator-side tool reads a JSON list of per-segment failures from
//! the segment-side driver's stderr.

use gpmgmt_core::{ErrorStage, RecoveryInfo, RecoveryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One failed segment recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentErrorRecord {
    pub error_type: ErrorStage,
    pub dbid: i32,
    pub datadir: PathBuf,
    pub port: u16,
    pub progress_file: PathBuf,
    pub error_msg: String,
}

/// Records for every failed result that belongs to one of `infos`
pub fn failure_records(
    infos: &[RecoveryInfo],
    results: &[RecoveryResult],
) -> Vec<SegmentErrorRecord> {
    let by_dbid: HashMap<i32, &RecoveryInfo> =
        infos.iter().map(|i| (i.target_segment_dbid, i)).collect();

    results
        .iter()
        .filter(|r| !r.success)
        .filter_map(|r| {
            let info = by_dbid.get(&r.dbid?)?;
            Some(SegmentErrorRecord {
                error_type: r.stage,
                dbid: info.target_segment_dbid,
                datadir: info.target_datadir.clone(),
                port: info.target_port,
                progress_file: info.progress_file.clone(),
                error_msg: r.message.clone(),
            })
        })
        .collect()
}

/// Serialize records for the coordinator
pub fn to_json(records: &[SegmentErrorRecord]) -> serde_json::Result<String> {
    serde_json::to_string(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(dbid: i32) -> RecoveryInfo {
        RecoveryInfo {
            target_datadir: PathBuf::from(format!("/data/m{}", dbid)),
            source_hostname: "sdw1".to_string(),
            source_port: 6000,
            target_segment_dbid: dbid,
            target_port: 7000 + dbid as u16,
            progress_file: PathBuf::from(format!("/tmp/p{}", dbid)),
            is_full_recovery: false,
        }
    }

    #[test]
    fn test_only_failures_reported() {
        let infos = vec![info(2), info(3)];
        let results = vec![
            RecoveryResult::succeeded("Run pg_rewind", Some(2)),
            RecoveryResult::failed("Run pg_rewind", Some(3), ErrorStage::RewindError, "diverged"),
        ];

        let records = failure_records(&infos, &results);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dbid, 3);
        assert_eq!(records[0].port, 7003);
        assert_eq!(records[0].error_type, ErrorStage::RewindError);
    }

    #[test]
    fn test_json_shape() {
        let infos = vec![info(4)];
        let results = vec![RecoveryResult::failed(
            "Run pg_rewind",
            Some(4),
            ErrorStage::StartError,
            "no",
        )];
        let json = to_json(&failure_records(&infos, &results)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["error_type"], "START_ERROR");
        assert_eq!(value[0]["dbid"], 4);
        assert_eq!(value[0]["datadir"], "/data/m4");
        assert_eq!(value[0]["error_msg"], "no");
    }

    #[test]
    fn test_results_without_dbid_ignored() {
        let results = vec![RecoveryResult::failed("panic", None, ErrorStage::DefaultError, "x")];
        assert!(failure_records(&[info(1)], &results).is_empty());
    }
}
