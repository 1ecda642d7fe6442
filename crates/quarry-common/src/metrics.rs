//! Metrics for the column engine
//!
//! Thin recorders over the `metrics` facade. The library never installs an
//! exporter; the embedding process decides where these go.
#![allow(clippy::cast_precision_loss)]

use metrics::{counter, histogram};

/// Record a batch compaction
pub fn record_compaction(bytes_before: u64, bytes_after: u64) {
    counter!("quarry_byte_block_compaction_total").increment(1);
    counter!("quarry_byte_block_compaction_bytes_reclaimed_total")
        .increment(bytes_before.saturating_sub(bytes_after));
}

/// Record a standalone allocation for a value over the huge threshold
pub fn record_huge_allocation(bytes: u64) {
    counter!("quarry_byte_block_huge_allocations_total").increment(1);
    histogram!("quarry_byte_block_huge_value_bytes").record(bytes as f64);
}

/// Record a fast-add commit
pub fn record_commit(rows: u64) {
    counter!("quarry_sorted_commit_total").increment(1);
    histogram!("quarry_sorted_commit_rows").record(rows as f64);
}

/// Record an operator that no layer of a column stack could evaluate
pub fn record_unsupported_operator(column: &str, operator: &str) {
    counter!(
        "quarry_unsupported_operator_total",
        "column" => column.to_string(),
        "operator" => operator.to_string()
    )
    .increment(1);
}
