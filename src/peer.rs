// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Peer client contract and wire types.
//!
//! The engine never talks HTTP itself. It consumes two handles implementing
//! [`PeerClient`], one for the source database and one for the target, and
//! drives the replication protocol through this capability set:
//!
//! ```text
//! ┌──────────────┐   get_changes / transfer    ┌──────────────┐
//! │ source peer  │────────────────────────────▶│    engine    │
//! └──────────────┘                             └──────┬───────┘
//!                                                     │ revs_diff /
//!                                                     │ bulk_update /
//!                                                     ▼ put_document
//!                                              ┌──────────────┐
//!                                              │ target peer  │
//!                                              └──────────────┘
//! ```
//!
//! Implementations own connection pooling, TLS, and multipart MIME
//! handling. The trait is object-safe: every async method returns a
//! [`BoxFuture`] so mocks and real HTTP clients plug in the same way.
//!
//! # Error surface
//!
//! Transport methods return [`PeerError`], which the engine maps into its
//! own taxonomy with peer/path tagging. [`PeerClient::find_document`] is
//! the exception: it returns a status-carrying [`DocumentResponse`]
//! because 404 is ordinary data in the checkpoint protocol, not a failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::revision::{RevisionDiff, RevisionMapping};
use crate::task::FeedStyle;

/// Result type for peer operations.
pub type PeerResult<T> = std::result::Result<T, PeerError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = PeerResult<T>> + Send + 'a>>;

/// Transport-level failure reported by a peer client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    /// The requested database or document does not exist (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Non-2xx response outside the handled 404 cases.
    #[error("HTTP {status} at {path}")]
    Http { path: String, status: u16 },

    /// The peer could not be reached at all (connect/DNS/reset).
    ///
    /// The engine treats this as transient for document transfers
    /// (one retry) and as fatal for peer verification.
    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

impl PeerError {
    /// Check whether this is a connectivity failure worth one retry.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// A change-feed sequence token.
///
/// Kept opaque because document stores disagree on the representation:
/// integers in older CouchDB releases, strings in newer ones. The engine
/// only ever compares tokens for equality and threads them back into
/// `since` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(Value);

impl Sequence {
    /// The start-of-feed token (integer zero).
    pub fn zero() -> Self {
        Sequence(Value::from(0))
    }

    /// Wrap a raw JSON value as a sequence token.
    pub fn from_value(value: Value) -> Self {
        Sequence(value)
    }

    /// The raw JSON value, for building request parameters.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Check whether this is the start-of-feed token.
    pub fn is_zero(&self) -> bool {
        self.0 == Value::from(0)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            // Strings print without surrounding quotes for log readability.
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<u64> for Sequence {
    fn from(n: u64) -> Self {
        Sequence(Value::from(n))
    }
}

impl From<&str> for Sequence {
    fn from(s: &str) -> Self {
        Sequence(Value::from(s))
    }
}

/// Feed mode for a changes request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Finite response: one page of changes, then done.
    Normal,
    /// Live line-delimited stream held open with heartbeat or timeout.
    Continuous,
}

/// Parameters for [`PeerClient::get_changes`] / [`PeerClient::get_changes_stream`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesOptions {
    pub feed: FeedMode,
    pub style: FeedStyle,
    pub since: Sequence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    /// Page size for normal-feed pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Keep-alive interval in milliseconds (continuous feed only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<u64>,
    /// Idle cutoff in milliseconds (continuous feed, when no heartbeat).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// One revision reference inside a change row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// One row of a change feed: a document and its leaf revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    pub seq: Sequence,
    pub changes: Vec<ChangeRev>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// A finite page of changes from the normal feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesPage {
    pub results: Vec<ChangeRow>,
    pub last_seq: Sequence,
}

/// A status-carrying document response (200/404/other).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl DocumentResponse {
    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Per-document result line from a bulk update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDocStatus {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkDocStatus {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Response from executing a bulk update against the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUpdateResponse {
    pub status: u16,
    #[serde(default)]
    pub results: Vec<BulkDocStatus>,
}

impl BulkUpdateResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of uploading one attachment-bearing revision to the target.
///
/// A failed revision response carries no `rev` field; only the error text
/// survives the multipart round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MultipartOutcome {
    Written { rev: String, status: u16 },
    Failed { error: String },
}

impl MultipartOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// A live line-delimited change stream (continuous feed).
///
/// `next_line` suspends on network I/O until the peer emits the next
/// line, the idle timeout expires, or the stream is closed. `Ok(None)`
/// means orderly EOF; dropping the stream closes the underlying
/// connection, which is the cancellation mechanism.
pub trait ChangeStream: Send {
    fn next_line(&mut self) -> BoxFuture<'_, Option<String>>;
}

/// Capability set the engine consumes from each peer.
///
/// Implementations wrap one database on one document store. Everything
/// returns a [`BoxFuture`] borrowing only `self` (arguments are cloned
/// into the future by the implementation), except
/// [`transfer_changed_documents`](Self::transfer_changed_documents) which
/// also borrows the target handle for the duration of the transfer.
///
/// Peer clients must be safe for concurrent use by independent runs; a
/// single run only ever issues one call at a time per peer.
pub trait PeerClient: Send + Sync + 'static {
    /// Stable identity of the server hosting this peer (URL or UUID).
    ///
    /// Folded into the replication id so checkpoints from different
    /// servers never collide.
    fn server_id(&self) -> &str;

    /// Name of the database this handle points at.
    fn db_name(&self) -> &str;

    /// `GET /{db}`: database info record.
    ///
    /// The engine validates the body for `db_name`,
    /// `instance_start_time`, and `update_seq`.
    fn get_database_info(&self) -> BoxFuture<'_, Value>;

    /// `PUT /{db}`: create the database.
    fn create_database(&self) -> BoxFuture<'_, ()>;

    /// `GET /{db}/{doc_id}`: status-carrying fetch; 404 is data.
    fn find_document(&self, doc_id: &str) -> BoxFuture<'_, DocumentResponse>;

    /// `PUT /{db}/{path}`: raw document write (checkpoint writes).
    fn put_document(&self, path: &str, body: Value) -> BoxFuture<'_, DocumentResponse>;

    /// `GET /{db}/_changes` with `feed=normal`: one finite page.
    fn get_changes(&self, options: ChangesOptions) -> BoxFuture<'_, ChangesPage>;

    /// `GET /{db}/_changes` with `feed=continuous`: live stream.
    fn get_changes_stream(
        &self,
        options: ChangesOptions,
    ) -> BoxFuture<'_, Box<dyn ChangeStream>>;

    /// `POST /{db}/_revs_diff`: which of these revisions is the peer missing.
    fn get_revision_difference(&self, mapping: RevisionMapping) -> BoxFuture<'_, RevisionDiff>;

    /// `POST /{db}/_bulk_docs`: batched write, optionally with
    /// new-edits disabled so supplied revision ids are applied verbatim.
    fn bulk_update(&self, docs: Vec<Value>, new_edits: bool)
        -> BoxFuture<'_, BulkUpdateResponse>;

    /// Fetch the missing revisions of one document (full revision
    /// history, latest content) and push any attachment-bearing
    /// revisions straight to `target` as multipart uploads.
    ///
    /// Returns the plain document bodies destined for the bulk buffer
    /// and the per-revision multipart outcomes. The outcome list is
    /// empty when no transferred revision carried attachments.
    fn transfer_changed_documents<'a>(
        &'a self,
        doc_id: &str,
        revs: &[String],
        target: &'a dyn PeerClient,
    ) -> BoxFuture<'a, (Vec<Value>, Vec<MultipartOutcome>)>;

    /// `POST /{db}/_ensure_full_commit`: flush target writes to disk.
    fn ensure_full_commit(&self) -> BoxFuture<'_, ()>;
}
