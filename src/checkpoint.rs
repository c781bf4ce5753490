// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint documents (replication logs).
//!
//! Each peer keeps a `_local/{replication_id}` document recording the
//! last sequence it agreed on and a session history. Comparing the two
//! logs decides where a new run resumes:
//!
//! 1. Either log missing: start from the task's configured cursor.
//! 2. Latest session ids match: resume from the recorded sequence.
//! 3. Otherwise walk the source history, most recent first, for a
//!    session the target also knows, and resume from its sequence.
//! 4. No shared session: start from the beginning of the feed.
//!
//! Local documents never appear in change feeds, so checkpoints never
//! replicate themselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ReplicationError, Result};
use crate::peer::Sequence;

/// Replication id algorithm version recorded in every checkpoint.
pub const REPLICATION_ID_VERSION: u32 = 3;

/// One completed session in a checkpoint's history, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub recorded_seq: Sequence,
    /// RFC 2822 style timestamps, human-oriented only.
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_write_failures: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_checked: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_found: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_last_seq: Option<Sequence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_last_seq: Option<Sequence>,
}

/// A `_local/{replication_id}` checkpoint document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationLog {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub session_id: String,
    pub source_last_seq: Sequence,
    pub history: Vec<HistoryEntry>,
    pub replication_id_version: u32,
}

impl ReplicationLog {
    /// Parse a checkpoint body fetched from a peer.
    ///
    /// The protocol-required fields are checked by name first so a
    /// corrupt checkpoint reports exactly which field is gone rather
    /// than a generic deserialization failure.
    pub fn from_value(body: Value, path: &str) -> Result<Self> {
        for field in ["session_id", "source_last_seq", "history"] {
            if body.get(field).is_none() {
                return Err(ReplicationError::missing_field(field, path.to_string()));
            }
        }
        serde_json::from_value(body).map_err(|err| {
            ReplicationError::Config(format!("malformed checkpoint at {path}: {err}"))
        })
    }
}

/// Decide the resume point from the two peers' checkpoints.
///
/// `fallback` is the task's configured cursor, used when either log is
/// missing (fresh target, first run, or deleted checkpoint).
pub fn compare_replication_logs(
    source: Option<&ReplicationLog>,
    target: Option<&ReplicationLog>,
    fallback: &Sequence,
) -> Sequence {
    let (source, target) = match (source, target) {
        (Some(s), Some(t)) => (s, t),
        _ => return fallback.clone(),
    };

    if source.session_id == target.session_id {
        return source.source_last_seq.clone();
    }

    for entry in &source.history {
        let known = target
            .history
            .iter()
            .any(|t| t.session_id == entry.session_id);
        if known {
            return entry.recorded_seq.clone();
        }
    }

    Sequence::zero()
}

/// Generate a fresh session id from the wall clock.
pub fn new_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let digest = Sha256::digest(nanos.to_be_bytes());
    hex::encode(digest)[..32].to_string()
}

/// Current wall-clock time in the checkpoint history format.
pub fn history_timestamp() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S %Z")
        .to_string()
}
