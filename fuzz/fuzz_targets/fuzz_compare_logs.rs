//! Fuzz target for checkpoint comparison.
//!
//! Builds two replication logs from arbitrary JSON and checks that
//! `compare_replication_logs` never panics and always returns one of the
//! known resume points.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaxed_replicator::{compare_replication_logs, ReplicationLog, Sequence};

fuzz_target!(|data: (&[u8], &[u8], u64)| {
    let (source, target, fallback) = data;
    let source = serde_json::from_slice(source)
        .ok()
        .and_then(|body| ReplicationLog::from_value(body, "/a/_local/fuzz").ok());
    let target = serde_json::from_slice(target)
        .ok()
        .and_then(|body| ReplicationLog::from_value(body, "/b/_local/fuzz").ok());

    let fallback = Sequence::from(fallback);
    let resume = compare_replication_logs(source.as_ref(), target.as_ref(), &fallback);

    let known = resume == fallback
        || resume.is_zero()
        || source.as_ref().is_some_and(|log| {
            log.source_last_seq == resume
                || log.history.iter().any(|entry| entry.recorded_seq == resume)
        });
    assert!(known);
});
