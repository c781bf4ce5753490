//! Fuzz target for continuous-feed line parsing.
//!
//! This tests that `parse_change_line` never panics on arbitrary input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaxed_replicator::revision::parse_change_line;

fuzz_target!(|data: &str| {
    // Should never panic; malformed lines report a feed error
    let _ = parse_change_line(data);
});
