//! Fuzz target for checkpoint document parsing.
//!
//! This tests that `ReplicationLog::from_value` never panics on
//! arbitrary JSON bodies fetched from a peer.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaxed_replicator::ReplicationLog;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = serde_json::from_slice(data) {
        let _ = ReplicationLog::from_value(body, "/db/_local/fuzz");
    }
});
