use std::time::Duration;

use model::{RepairClass, SegmentPath};
use observation::metrics::repair_metrics;

/// Where a repair attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStatus {
    /// The attempt has not reached a decision yet.
    Pending,
    MetadataFetchFailed,
    SegmentDeleted,
    InlineSegment,
    Expired,
    DirectoryQueryFailed,
    NodesUnavailable,
    Unnecessary,
    InvalidPath,
    AuthorizationFailed,
    TooManyNodesFailed,
    ReconstructionFailed,
    UploadFailed,
    CommitFailed,
    Repaired,
    Cancelled,
    TimedOut,
}

/// Structured record of one repair attempt, turned into metrics by whoever runs the repairer.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub path: SegmentPath,
    pub status: RepairStatus,

    /// Set once the segment is known to be live, remote and unexpired.
    pub segment_size: Option<u64>,

    pub total_pieces: Option<usize>,
    pub healthy_before: Option<usize>,
    pub healthy_after: Option<usize>,
    pub class: Option<RepairClass>,

    /// Downloaded pieces whose bytes failed verification.
    pub audit_failures: usize,

    /// Downloads that failed because the node was unreachable, slow or refused.
    pub transient_failures: usize,

    /// Age of the segment when the repair was committed.
    pub segment_age: Option<Duration>,

    /// Repair count of the segment after the commit.
    pub repair_count: Option<u32>,
}

impl RepairReport {
    pub fn new(path: SegmentPath) -> Self {
        Self {
            path,
            status: RepairStatus::Pending,
            segment_size: None,
            total_pieces: None,
            healthy_before: None,
            healthy_after: None,
            class: None,
            audit_failures: 0,
            transient_failures: 0,
            segment_age: None,
            repair_count: None,
        }
    }

    fn healthy_ratio(&self, healthy: Option<usize>) -> Option<f64> {
        match (healthy, self.total_pieces) {
            (Some(healthy), Some(total)) if total > 0 => Some(healthy as f64 / total as f64),
            _ => None,
        }
    }

    pub fn record_metrics(&self) {
        match self.status {
            RepairStatus::SegmentDeleted => repair_metrics::segment_deleted_before_repair(),
            RepairStatus::Expired => repair_metrics::repair_expired(),
            _ => {}
        }

        if let Some(segment_size) = self.segment_size {
            repair_metrics::repair_attempt(segment_size);
        }

        match self.status {
            RepairStatus::NodesUnavailable => repair_metrics::repair_nodes_unavailable(),
            RepairStatus::Unnecessary => repair_metrics::repair_unnecessary(),
            RepairStatus::TooManyNodesFailed => repair_metrics::repair_too_many_nodes_failed(),
            _ => {}
        }

        if !matches!(
            self.status,
            RepairStatus::NodesUnavailable | RepairStatus::Unnecessary
        ) {
            if let Some(ratio) = self.healthy_ratio(self.healthy_before) {
                repair_metrics::healthy_ratio_before_repair(ratio);
            }
        }

        if let (Some(class), Some(ratio)) = (self.class, self.healthy_ratio(self.healthy_after)) {
            repair_metrics::repair_result(class.as_str(), ratio);
        }

        if self.audit_failures > 0 || self.transient_failures > 0 {
            repair_metrics::piece_download_failures(self.audit_failures, self.transient_failures);
        }

        if let (Some(segment_age), Some(repair_count)) = (self.segment_age, self.repair_count) {
            repair_metrics::segment_repaired(segment_age, repair_count);
        }
    }
}
