//! Central metrics registry and metric definitions
//!
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

// ===== Version Chain Metrics =====

/// Saves by outcome (`created`, `deduplicated`, `conflict`, `timeout`, `error`)
pub static SAVE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_save_operations_total",
        "Total number of save operations",
        &["resource_type", "outcome"]
    )
    .expect("Failed to register save operations counter")
});

/// Save duration histogram
pub static SAVE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "folio_save_duration_seconds",
        "Save duration in seconds",
        &["storage_type"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register save duration histogram")
});

/// Lost compare-and-swap attempts on the latest flag
pub static LATEST_SWAP_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_latest_swap_retries_total",
        "Total number of retried latest-flag swaps",
        &["resource_type"]
    )
    .expect("Failed to register latest swap retry counter")
});

// ===== Content Metrics =====

/// Reads that failed checksum, hash or decompression checks
pub static CONTENT_CORRUPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_content_corrupted_total",
        "Total number of corrupted content reads",
        &["storage_type"]
    )
    .expect("Failed to register content corruption counter")
});

/// External payload bytes written, before and after compression
pub static EXTERNAL_BYTES_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_external_bytes_written_total",
        "Total external payload bytes written",
        &["kind"]
    )
    .expect("Failed to register external bytes counter")
});

// ===== Cache Metrics =====

/// Cache operations by namespace, tier and result
pub static CACHE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_cache_operations_total",
        "Total number of cache operations",
        &["namespace", "tier", "result"]
    )
    .expect("Failed to register cache operations counter")
});

/// Degraded L2 operations that fell through
pub static CACHE_DEGRADED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_cache_degraded_total",
        "Total number of L2 failures handled by falling through",
        &["operation"]
    )
    .expect("Failed to register cache degraded counter")
});

/// L2 bytes on disk per namespace
pub static CACHE_L2_BYTES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "folio_cache_l2_bytes",
        "Bytes held by the L2 cache tier",
        &["namespace"]
    )
    .expect("Failed to register L2 bytes gauge")
});

// ===== Retention Metrics =====

/// Versions removed by prune (dry runs are not counted)
pub static PRUNED_VERSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_pruned_versions_total",
        "Total number of versions deleted by pruning",
        &["resource_type"]
    )
    .expect("Failed to register pruned versions counter")
});
