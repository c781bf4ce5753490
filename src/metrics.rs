//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Change feed consumption
//! - Revision diffing (missing checked/found)
//! - Document reads, writes, and write failures
//! - Transfer retries
//! - Checkpoint writes
//! - Engine state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use relaxed_replicator::metrics;
//! use std::time::Duration;
//!
//! // After draining one page of the change feed
//! metrics::record_feed_page("db-a", 42, Duration::from_millis(15));
//!
//! // After a bulk batch lands on the target
//! metrics::record_docs_written("db-b", 42);
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record documents read from the source.
pub fn record_docs_read(db: &str, count: usize) {
    counter!("replication_docs_read_total", "db" => db.to_string()).increment(count as u64);
}

/// Record documents written to the target (bulk and multipart).
pub fn record_docs_written(db: &str, count: usize) {
    counter!("replication_docs_written_total", "db" => db.to_string()).increment(count as u64);
}

/// Record documents that failed to land on the target.
pub fn record_doc_write_failures(db: &str, count: usize) {
    if count > 0 {
        counter!("replication_doc_write_failures_total", "db" => db.to_string())
            .increment(count as u64);
    }
}

/// Record revisions submitted to the target for diffing.
pub fn record_missing_checked(db: &str, count: usize) {
    counter!("replication_missing_checked_total", "db" => db.to_string()).increment(count as u64);
}

/// Record revisions the target reported missing.
pub fn record_missing_found(db: &str, count: usize) {
    counter!("replication_missing_found_total", "db" => db.to_string()).increment(count as u64);
}

/// Record one page of the normal change feed.
pub fn record_feed_page(db: &str, rows: usize, duration: Duration) {
    counter!("replication_feed_pages_total", "db" => db.to_string()).increment(1);
    if rows > 0 {
        counter!("replication_feed_rows_total", "db" => db.to_string()).increment(rows as u64);
    }
    histogram!("replication_feed_page_duration_seconds", "db" => db.to_string())
        .record(duration.as_secs_f64());
}

/// Record one event line from the continuous feed.
///
/// `kind` is `change`, `skipped`, or `parse_error`.
pub fn record_continuous_event(db: &str, kind: &str) {
    counter!("replication_continuous_events_total", "db" => db.to_string(), "kind" => kind.to_string()).increment(1);
}

/// Record a document transfer retry after a connectivity failure.
pub fn record_transfer_retry(db: &str, doc_id: &str) {
    counter!("replication_transfer_retries_total", "db" => db.to_string(), "doc_id" => doc_id.to_string()).increment(1);
}

/// Record a checkpoint write result.
pub fn record_checkpoint_write(db: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_checkpoint_writes_total", "db" => db.to_string(), "status" => status)
        .increment(1);
}

/// Record a bulk update batch landing on the target.
pub fn record_bulk_batch(db: &str, size: usize, duration: Duration) {
    counter!("replication_bulk_batches_total", "db" => db.to_string()).increment(1);
    histogram!("replication_bulk_batch_size", "db" => db.to_string()).record(size as f64);
    histogram!("replication_bulk_batch_duration_seconds", "db" => db.to_string())
        .record(duration.as_secs_f64());
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encode state as numeric for alerting (0=created ... 5=failed)
    let value = match state {
        "Created" => 0.0,
        "VerifyingPeers" => 1.0,
        "Replicating" => 2.0,
        "WritingCheckpoint" => 3.0,
        "Completed" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: The metrics crate uses global state. In tests, we just verify that
    // the functions don't panic and handle edge cases correctly.

    #[test]
    fn test_record_counters() {
        record_docs_read("db-a", 10);
        record_docs_read("db-a", 0);
        record_docs_written("db-b", 10);
        record_doc_write_failures("db-b", 0);
        record_doc_write_failures("db-b", 2);
        record_missing_checked("db-b", 5);
        record_missing_found("db-b", 3);
    }

    #[test]
    fn test_record_feed_page() {
        record_feed_page("db-a", 100, Duration::from_millis(20));
        record_feed_page("db-a", 0, Duration::ZERO);
    }

    #[test]
    fn test_record_continuous_event_kinds() {
        record_continuous_event("db-a", "change");
        record_continuous_event("db-a", "skipped");
        record_continuous_event("db-a", "parse_error");
    }

    #[test]
    fn test_record_transfer_retry() {
        record_transfer_retry("db-a", "doc-1");
    }

    #[test]
    fn test_record_checkpoint_write() {
        record_checkpoint_write("db-b", true);
        record_checkpoint_write("db-b", false);
    }

    #[test]
    fn test_record_bulk_batch() {
        record_bulk_batch("db-b", 100, Duration::from_millis(35));
        record_bulk_batch("db-b", 0, Duration::ZERO);
    }

    #[test]
    fn test_set_engine_state_all_states() {
        set_engine_state("Created");
        set_engine_state("VerifyingPeers");
        set_engine_state("Replicating");
        set_engine_state("WritingCheckpoint");
        set_engine_state("Completed");
        set_engine_state("Failed");
        // Unknown state should map to -1
        set_engine_state("Unknown");
    }
}
