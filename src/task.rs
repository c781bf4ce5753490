//! Replication task configuration.
//!
//! A [`ReplicationTask`] describes one replication run: feed mode, filter,
//! target-creation policy, doc-id allowlist, keep-alive tuning, batching
//! limits, and the resumption cursor. It is constructed by the caller,
//! validated up front, and treated as read-only for the duration of a run
//! except for two fields the engine owns: the derived `replication_id` and
//! the advancing `since_seq` cursor.
//!
//! Tasks serialize to/from JSON so they can live in config files:
//!
//! ```rust
//! use relaxed_replicator::task::ReplicationTask;
//!
//! let task: ReplicationTask = serde_json::from_str(r#"{
//!     "continuous": false,
//!     "create_target": true,
//!     "style": "all_docs"
//! }"#).unwrap();
//! assert!(task.create_target());
//! ```
//!
//! # Doc-id / filter invariant
//!
//! An explicit doc-id allowlist implies the reserved `_doc_ids` filter.
//! Setting both a doc-id list and any other filter name is a
//! configuration error, raised at construction/mutation time, never
//! mid-run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ReplicationError, Result};
use crate::peer::Sequence;

/// Reserved filter name selecting the explicit doc-id allowlist.
pub const DOC_IDS_FILTER: &str = "_doc_ids";

/// Default idle cutoff for the continuous feed when neither heartbeat
/// nor timeout is configured (milliseconds).
pub const DEFAULT_FEED_TIMEOUT_MS: u64 = 10_000;

fn default_style() -> FeedStyle {
    FeedStyle::AllDocs
}

fn default_bulk_docs_limit() -> usize {
    100
}

fn default_changes_limit() -> usize {
    1000
}

/// How many leaf revisions per change the feed reports, and how
/// revision-diff results merge across paginated feed pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStyle {
    /// All leaf revisions; diff pages deep-merge per document.
    AllDocs,
    /// Winning revision only; diff pages replace per document.
    MainOnly,
}

impl FeedStyle {
    /// Wire representation, as sent in `style=` parameters and folded
    /// into the replication id.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStyle::AllDocs => "all_docs",
            FeedStyle::MainOnly => "main_only",
        }
    }
}

impl Default for FeedStyle {
    fn default() -> Self {
        default_style()
    }
}

/// Configuration for one replication run.
///
/// See the module docs for lifecycle and invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTask {
    /// Derived replication identity; set once per run by the engine,
    /// never user-supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replication_id: Option<String>,

    /// Streaming (continuous) vs one-shot feed consumption.
    #[serde(default)]
    continuous: bool,

    /// Named filter reference (`"designdoc/function"`) or a reserved
    /// `_`-prefixed name such as `_doc_ids`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<String>,

    /// Extra filter parameters. When non-empty, the filter source is
    /// treated as already identified by its parameters and is not
    /// fetched for id derivation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, String>,

    /// Auto-create a missing target database during peer verification.
    #[serde(default)]
    create_target: bool,

    /// Explicit doc-id allowlist, kept sorted for deterministic hashing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc_ids: Option<Vec<String>>,

    /// Continuous-feed keep-alive interval (ms). Takes precedence over
    /// `timeout` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    heartbeat: Option<u64>,

    /// Continuous-feed idle cutoff (ms), used when no heartbeat is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,

    #[serde(default = "default_style")]
    style: FeedStyle,

    /// Resumption cursor; advanced by checkpoint comparison and by
    /// paginated normal-feed reads.
    #[serde(default)]
    since_seq: Sequence,

    /// Max documents per bulk-update batch.
    #[serde(default = "default_bulk_docs_limit")]
    bulk_docs_limit: usize,

    /// Page size for normal-feed pagination.
    #[serde(default = "default_changes_limit")]
    changes_limit: usize,
}

impl Default for ReplicationTask {
    fn default() -> Self {
        Self {
            replication_id: None,
            continuous: false,
            filter: None,
            parameters: BTreeMap::new(),
            create_target: false,
            doc_ids: None,
            heartbeat: None,
            timeout: None,
            style: default_style(),
            since_seq: Sequence::zero(),
            bulk_docs_limit: default_bulk_docs_limit(),
            changes_limit: default_changes_limit(),
        }
    }
}

impl ReplicationTask {
    /// Create a one-shot task with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the doc-id / filter invariant.
    ///
    /// Call after deserializing a task from external config; the setters
    /// below maintain the invariant for programmatic construction.
    pub fn validate(&self) -> Result<()> {
        if self.doc_ids.is_some() {
            match self.filter.as_deref() {
                None | Some(DOC_IDS_FILTER) => {}
                Some(other) => {
                    return Err(ReplicationError::Config(format!(
                        "doc_ids requires the {} filter, got `{}`",
                        DOC_IDS_FILTER, other
                    )));
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Builder-style setters (consume and return self)
    // ─────────────────────────────────────────────────────────────────────

    pub fn continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn with_create_target(mut self, create_target: bool) -> Self {
        self.create_target = create_target;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Result<Self> {
        self.set_filter(Some(filter.into()))?;
        Ok(self)
    }

    pub fn with_doc_ids(mut self, doc_ids: Vec<String>) -> Result<Self> {
        self.set_doc_ids(Some(doc_ids))?;
        Ok(self)
    }

    pub fn with_style(mut self, style: FeedStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<u64>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_since_seq(mut self, since_seq: Sequence) -> Self {
        self.since_seq = since_seq;
        self
    }

    pub fn with_bulk_docs_limit(mut self, limit: usize) -> Self {
        self.bulk_docs_limit = limit.max(1);
        self
    }

    pub fn with_changes_limit(mut self, limit: usize) -> Self {
        self.changes_limit = limit.max(1);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutating setters used by the engine and façade
    // ─────────────────────────────────────────────────────────────────────

    /// Set the doc-id allowlist, sorting it and forcing the `_doc_ids`
    /// filter. A conflicting explicit filter is a configuration error.
    pub fn set_doc_ids(&mut self, doc_ids: Option<Vec<String>>) -> Result<()> {
        if let Some(mut ids) = doc_ids {
            ids.sort();
            match self.filter.as_deref() {
                None => self.filter = Some(DOC_IDS_FILTER.to_string()),
                Some(DOC_IDS_FILTER) => {}
                Some(other) => {
                    return Err(ReplicationError::Config(format!(
                        "doc_ids requires the {} filter, got `{}`",
                        DOC_IDS_FILTER, other
                    )));
                }
            }
            self.doc_ids = Some(ids);
        } else {
            self.doc_ids = None;
        }
        Ok(())
    }

    /// Set the named filter. Rejects names conflicting with an existing
    /// doc-id allowlist.
    pub fn set_filter(&mut self, filter: Option<String>) -> Result<()> {
        if self.doc_ids.is_some() {
            match filter.as_deref() {
                None | Some(DOC_IDS_FILTER) => {}
                Some(other) => {
                    return Err(ReplicationError::Config(format!(
                        "doc_ids requires the {} filter, got `{}`",
                        DOC_IDS_FILTER, other
                    )));
                }
            }
        }
        self.filter = filter;
        Ok(())
    }

    /// Record the derived replication id (engine-owned).
    pub fn set_replication_id(&mut self, id: String) {
        self.replication_id = Some(id);
    }

    /// Advance the resumption cursor (engine-owned).
    pub fn set_since_seq(&mut self, seq: Sequence) {
        self.since_seq = seq;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn replication_id(&self) -> Option<&str> {
        self.replication_id.as_deref()
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn create_target(&self) -> bool {
        self.create_target
    }

    pub fn doc_ids(&self) -> Option<&[String]> {
        self.doc_ids.as_deref()
    }

    pub fn heartbeat(&self) -> Option<u64> {
        self.heartbeat
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn style(&self) -> FeedStyle {
        self.style
    }

    pub fn since_seq(&self) -> &Sequence {
        &self.since_seq
    }

    pub fn bulk_docs_limit(&self) -> usize {
        self.bulk_docs_limit
    }

    pub fn changes_limit(&self) -> usize {
        self.changes_limit
    }

    /// The idle cutoff to apply to a continuous feed when no heartbeat
    /// is configured.
    pub fn effective_timeout(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_FEED_TIMEOUT_MS)
    }
}
