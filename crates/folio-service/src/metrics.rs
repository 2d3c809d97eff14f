//! Prometheus exposition for every metric registered by the Folio crates

use prometheus::{Encoder, TextEncoder};

/// Gathers all registered metrics and encodes them in the Prometheus text
/// exposition format.
///
/// # Example
///
/// ```rust
/// use folio_service::metrics;
///
/// let metrics_text = metrics::export_prometheus();
/// println!("{}", metrics_text);
/// ```
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
        });

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to UTF-8: {}", e);
        String::from("# Error encoding metrics\n")
    })
}
