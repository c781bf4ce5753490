// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replicator.
//!
//! Errors fall into two classes with very different handling:
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `PeerUnreachable` | Yes | Source or target failed its reachability check |
//! | `MissingField` | Yes | Peer response lacked a protocol-required field |
//! | `Http` | Yes | Non-2xx peer response outside the handled 404 cases |
//! | `Config` | Yes | Invalid `ReplicationTask` or façade wiring |
//! | `DocumentTransfer` | No | One document's revisions could not be moved |
//! | `FeedParse` | No | Malformed line on the live change feed |
//! | `Canceled` | No | Run stopped by an external cancel signal |
//!
//! Fatal errors abort the run before any checkpoint is written. Non-fatal
//! errors are recorded per-document in the run report and replication
//! continues. Use [`ReplicationError::is_fatal()`] to distinguish them.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors raised by the replication engine.
///
/// Each variant carries the context needed to identify the failing peer,
/// path, or document. See the module docs for the fatality table.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A peer failed its database-info reachability check.
    ///
    /// Raised during peer verification, before any data moves.
    /// `peer` is `"source"` or `"target"`.
    #[error("{peer} peer not reachable")]
    PeerUnreachable { peer: &'static str },

    /// A peer response lacked a field the protocol requires.
    ///
    /// Covers database-info fields (`db_name`, `instance_start_time`,
    /// `update_seq`) and checkpoint fields (`session_id`,
    /// `source_last_seq`, `history`).
    #[error("missing protocol field `{field}` in {context}")]
    MissingField {
        field: &'static str,
        context: String,
    },

    /// Non-2xx peer response outside the explicitly handled 404 cases.
    ///
    /// Carries the request path and status so operators can see exactly
    /// which peer endpoint rejected the request.
    #[error("HTTP {status} at {path}")]
    Http { path: String, status: u16 },

    /// Failure transferring or applying one specific document's revisions.
    ///
    /// Recorded against the document id in the run report; does not
    /// abort the run.
    #[error("document transfer failed for `{doc_id}`: {message}")]
    DocumentTransfer { doc_id: String, message: String },

    /// A line on the live change feed could not be parsed.
    ///
    /// The offending line is skipped and counted as a failure; the
    /// stream read continues.
    #[error("change feed parse error: {0}")]
    FeedParse(String),

    /// Invalid configuration.
    ///
    /// Raised at task construction/mutation time or when the façade is
    /// started without a source, target, or task. Never raised mid-run.
    #[error("configuration error: {0}")]
    Config(String),

    /// The run was stopped by an external cancel signal.
    #[error("replication canceled")]
    Canceled,
}

impl ReplicationError {
    /// Create an HTTP failure tagged with the request path.
    pub fn http(path: impl Into<String>, status: u16) -> Self {
        Self::Http {
            path: path.into(),
            status,
        }
    }

    /// Create a per-document transfer failure.
    pub fn transfer(doc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DocumentTransfer {
            doc_id: doc_id.into(),
            message: message.into(),
        }
    }

    /// Create a missing-field failure naming the response it came from.
    pub fn missing_field(field: &'static str, context: impl Into<String>) -> Self {
        Self::MissingField {
            field,
            context: context.into(),
        }
    }

    /// Check whether this error aborts the whole run.
    ///
    /// Fatal errors stop the state machine immediately and no checkpoint
    /// is written. Non-fatal errors are isolated to a single document or
    /// feed line and surface only in the run report.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::PeerUnreachable { .. } => true,
            Self::MissingField { .. } => true,
            Self::Http { .. } => true,
            Self::Config(_) => true,
            Self::DocumentTransfer { .. } => false,
            Self::FeedParse(_) => false,
            Self::Canceled => false,
        }
    }
}
