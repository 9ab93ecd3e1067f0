use log::error;
use prometheus::{Encoder, TextEncoder};

pub mod repair_metrics;

/// Render every registered metric in the Prometheus text exposition format.
///
/// Serving the text is left to the embedding process.
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode prometheus metrics: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
