//! Engine state machine and run reporting types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::peer::{MultipartOutcome, Sequence};

/// Lifecycle state of one replication run.
///
/// States advance strictly forward; `Failed` is terminal and reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// Engine constructed, nothing verified yet.
    Created,
    /// Checking both peers are reachable (creating the target if asked).
    VerifyingPeers,
    /// Consuming the change feed and moving documents.
    Replicating,
    /// Writing the session checkpoint to both peers.
    WritingCheckpoint,
    /// Run finished; report is final.
    Completed,
    /// Run aborted on a fatal error; no checkpoint written.
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Created => "Created",
            EngineState::VerifyingPeers => "VerifyingPeers",
            EngineState::Replicating => "Replicating",
            EngineState::WritingCheckpoint => "WritingCheckpoint",
            EngineState::Completed => "Completed",
            EngineState::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Completed | EngineState::Failed)
    }
}

/// Accumulated outcome of one replication run.
///
/// Counters follow the checkpoint history vocabulary: `docs_read` from
/// the source, `missing_checked`/`missing_found` around the revision
/// diff, `docs_written`/`doc_write_failures` on the target. Per-document
/// responses are keyed by document id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationReport {
    /// Multipart upload outcomes per attachment-bearing document.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub multipart_response: BTreeMap<String, Vec<MultipartOutcome>>,

    /// Bulk update statuses per document batch the document landed in.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bulk_response: BTreeMap<String, Vec<u16>>,

    /// Non-fatal error strings per document.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error_response: BTreeMap<String, Vec<String>>,

    pub docs_read: u64,
    pub missing_checked: u64,
    pub missing_found: u64,
    pub docs_written: u64,
    pub doc_write_failures: u64,

    /// Feed cursor at the start of the run, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_last_seq: Option<Sequence>,

    /// Feed cursor the run ended on; what the checkpoint records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_last_seq: Option<Sequence>,

    /// Continuous mode: events fully replicated.
    pub success_count: u64,
    /// Continuous mode: events that recorded an error.
    pub failure_count: u64,
}

impl ReplicationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal per-document error.
    pub fn record_error(&mut self, doc_id: &str, message: impl Into<String>) {
        self.error_response
            .entry(doc_id.to_string())
            .or_default()
            .push(message.into());
    }

    /// Record the multipart outcomes for one document, folding write
    /// successes and failures into the counters.
    pub fn record_multipart(&mut self, doc_id: &str, outcomes: Vec<MultipartOutcome>) {
        if outcomes.is_empty() {
            return;
        }
        for outcome in &outcomes {
            if outcome.is_written() {
                self.docs_written += 1;
            } else {
                self.doc_write_failures += 1;
            }
        }
        self.multipart_response
            .entry(doc_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Record a bulk batch status against every document in the batch.
    pub fn record_bulk_status(&mut self, doc_ids: &[String], status: u16) {
        for doc_id in doc_ids {
            self.bulk_response
                .entry(doc_id.clone())
                .or_default()
                .push(status);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.error_response.is_empty() || self.doc_write_failures > 0
    }
}
