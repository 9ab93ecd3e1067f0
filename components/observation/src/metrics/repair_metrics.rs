use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

pub fn repair_attempt(segment_size: u64) {
    REPAIR_ATTEMPTS_COUNTER.inc();
    REPAIR_SEGMENT_SIZE_HISTOGRAM.observe((segment_size >> 10) as f64);
}

pub fn segment_deleted_before_repair() {
    REPAIR_UNNECESSARY_COUNTER.inc();
    SEGMENT_DELETED_BEFORE_REPAIR_COUNTER.inc();
}

pub fn repair_expired() {
    REPAIR_EXPIRED_COUNTER.inc();
}

pub fn repair_unnecessary() {
    REPAIR_UNNECESSARY_COUNTER.inc();
}

/// Too few pieces were healthy to attempt a download.
pub fn repair_nodes_unavailable() {
    REPAIR_NODES_UNAVAILABLE_COUNTER.inc();
}

/// Enough pieces looked healthy, but too many of them failed during download.
pub fn repair_too_many_nodes_failed() {
    REPAIR_TOO_MANY_NODES_FAILED_COUNTER.inc();
}

pub fn healthy_ratio_before_repair(ratio: f64) {
    HEALTHY_RATIO_BEFORE_REPAIR_HISTOGRAM.observe(ratio);
}

/// Record how a completed upload left the segment: `failed`, `partial` or `success`.
pub fn repair_result(class: &str, healthy_ratio_after_repair: f64) {
    REPAIR_RESULT_COUNTER.with_label_values(&[class]).inc();
    HEALTHY_RATIO_AFTER_REPAIR_HISTOGRAM.observe(healthy_ratio_after_repair);
}

pub fn segment_repaired(segment_age: Duration, repair_count: u32) {
    SEGMENT_TIME_UNTIL_REPAIR_HISTOGRAM.observe(segment_age.as_secs() as f64);
    SEGMENT_REPAIR_COUNT_HISTOGRAM.observe(repair_count as f64);
}

pub fn piece_download_failures(audit_failures: usize, transient_failures: usize) {
    PIECE_AUDIT_FAILURE_COUNTER.inc_by(audit_failures as u64);
    PIECE_TRANSIENT_FAILURE_COUNTER.inc_by(transient_failures as u64);
}

/// Record how the repair service disposed of an attempt: `retired`, `irreparable` or `retryable`.
pub fn repair_outcome(outcome: &str) {
    REPAIR_OUTCOME_COUNTER.with_label_values(&[outcome]).inc();
}

lazy_static! {
    pub static ref REPAIR_ATTEMPTS_COUNTER: IntCounter =
        register_int_counter!("repair_attempts", "Counter of repair attempts past the expiry check").unwrap();
    pub static ref REPAIR_SEGMENT_SIZE_HISTOGRAM: Histogram = register_histogram!(
        "repair_segment_size_histogram",
        "Histogram of repaired segment sizes in KiB",
        vec![4.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0]
    )
    .unwrap();
    pub static ref SEGMENT_DELETED_BEFORE_REPAIR_COUNTER: IntCounter = register_int_counter!(
        "segment_deleted_before_repair",
        "Counter of segments deleted before they could be repaired"
    )
    .unwrap();
    pub static ref REPAIR_EXPIRED_COUNTER: IntCounter =
        register_int_counter!("repair_expired", "Counter of expired segments left unrepaired").unwrap();
    pub static ref REPAIR_UNNECESSARY_COUNTER: IntCounter = register_int_counter!(
        "repair_unnecessary",
        "Counter of segments that did not need repair"
    )
    .unwrap();
    pub static ref REPAIR_NODES_UNAVAILABLE_COUNTER: IntCounter = register_int_counter!(
        "repair_nodes_unavailable",
        "Counter of segments with fewer healthy pieces than required"
    )
    .unwrap();
    pub static ref REPAIR_TOO_MANY_NODES_FAILED_COUNTER: IntCounter = register_int_counter!(
        "repair_too_many_nodes_failed",
        "Counter of segments whose download failed on too many nodes"
    )
    .unwrap();
    pub static ref REPAIR_RESULT_COUNTER: IntCounterVec = register_int_counter_vec!(
        "repair_result",
        "Counter of completed uploads by resulting segment health",
        &["result"]
    )
    .unwrap();
    pub static ref HEALTHY_RATIO_BEFORE_REPAIR_HISTOGRAM: Histogram = register_histogram!(
        "healthy_ratio_before_repair",
        "Histogram of healthy to total piece ratios before repair",
        vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
    )
    .unwrap();
    pub static ref HEALTHY_RATIO_AFTER_REPAIR_HISTOGRAM: Histogram = register_histogram!(
        "healthy_ratio_after_repair",
        "Histogram of healthy to total piece ratios after repair",
        vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
    )
    .unwrap();
    pub static ref SEGMENT_TIME_UNTIL_REPAIR_HISTOGRAM: Histogram = register_histogram!(
        "segment_time_until_repair",
        "Histogram of segment ages in seconds at repair time",
        vec![3600.0, 86400.0, 604800.0, 2592000.0, 7776000.0, 31536000.0]
    )
    .unwrap();
    pub static ref SEGMENT_REPAIR_COUNT_HISTOGRAM: Histogram = register_histogram!(
        "segment_repair_count",
        "Histogram of repair counts of repaired segments",
        vec![1.0, 2.0, 3.0, 5.0, 10.0, 20.0]
    )
    .unwrap();
    pub static ref PIECE_AUDIT_FAILURE_COUNTER: IntCounter = register_int_counter!(
        "repair_piece_audit_failures",
        "Counter of downloaded pieces failing verification"
    )
    .unwrap();
    pub static ref PIECE_TRANSIENT_FAILURE_COUNTER: IntCounter = register_int_counter!(
        "repair_piece_transient_failures",
        "Counter of piece downloads failing on unreachable or slow nodes"
    )
    .unwrap();
    pub static ref REPAIR_OUTCOME_COUNTER: IntCounterVec = register_int_counter_vec!(
        "repair_outcome",
        "Counter of repair attempts by disposition",
        &["outcome"]
    )
    .unwrap();
}
