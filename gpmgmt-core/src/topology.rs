//! Cluster topology model
//!
//! An ordered list of segments, each with one primary endpoint and an
//! optional mirror endpoint. Mirrorless clusters are valid.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{GpMgmtError, Result};

/// Role of an endpoint within its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentRole {
    Primary,
    Mirror,
}

/// One database instance of a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEndpoint {
    pub host: String,
    pub data_directory: PathBuf,
    pub content_id: i32,
    pub role: SegmentRole,
    /// Marked by the coordinator when the host could not be contacted
    #[serde(default)]
    pub unreachable: bool,
}

impl SegmentEndpoint {
    pub fn new(
        host: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        content_id: i32,
        role: SegmentRole,
    ) -> Self {
        Self {
            host: host.into(),
            data_directory: data_directory.into(),
            content_id,
            role,
            unreachable: false,
        }
    }

    pub fn primary(
        host: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        content_id: i32,
    ) -> Self {
        Self::new(host, data_directory, content_id, SegmentRole::Primary)
    }

    pub fn mirror(
        host: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        content_id: i32,
    ) -> Self {
        Self::new(host, data_directory, content_id, SegmentRole::Mirror)
    }

    pub fn with_unreachable(mut self, unreachable: bool) -> Self {
        self.unreachable = unreachable;
        self
    }
}

/// A segment: one content id served by a primary and at most one mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    primary: SegmentEndpoint,
    mirror: Option<SegmentEndpoint>,
}

impl Segment {
    /// Create a segment, checking roles and content ids agree
    pub fn new(primary: SegmentEndpoint, mirror: Option<SegmentEndpoint>) -> Result<Self> {
        if primary.role != SegmentRole::Primary {
            return Err(GpMgmtError::InvalidTopology(format!(
                "primary endpoint on {} has mirror role",
                primary.host
            )));
        }
        if let Some(m) = &mirror {
            if m.role != SegmentRole::Mirror {
                return Err(GpMgmtError::InvalidTopology(format!(
                    "mirror endpoint on {} has primary role",
                    m.host
                )));
            }
            if m.content_id != primary.content_id {
                return Err(GpMgmtError::ContentMismatch {
                    primary: primary.content_id,
                    mirror: m.content_id,
                });
            }
        }
        Ok(Self { primary, mirror })
    }

    pub fn content_id(&self) -> i32 {
        self.primary.content_id
    }

    pub fn primary(&self) -> &SegmentEndpoint {
        &self.primary
    }

    pub fn mirror(&self) -> Option<&SegmentEndpoint> {
        self.mirror.as_ref()
    }

    /// Primary first, then the mirror if there is one
    pub fn endpoints(&self) -> impl Iterator<Item = &SegmentEndpoint> {
        std::iter::once(&self.primary).chain(self.mirror.iter())
    }
}

/// Ordered collection of segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    segments: Vec<Segment>,
}

impl ClusterTopology {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Every endpoint in segment order, primary before mirror
    pub fn endpoints(&self) -> impl Iterator<Item = &SegmentEndpoint> {
        self.segments.iter().flat_map(|s| s.endpoints())
    }

    /// Distinct hosts in first-encounter order
    pub fn hosts(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.endpoints()
            .map(|e| e.host.as_str())
            .filter(|h| seen.insert(*h))
            .collect()
    }

    /// Data directories of every endpoint (either role) located on `host`
    pub fn data_dirs_on_host(&self, host: &str) -> Vec<PathBuf> {
        self.endpoints()
            .filter(|e| e.host == host)
            .map(|e| e.data_directory.clone())
            .collect()
    }
}
