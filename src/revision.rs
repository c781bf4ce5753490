//! Revision mapping and diff handling.
//!
//! Change-feed rows collapse into a [`RevisionMapping`] (document id to
//! leaf revisions), which the target answers with a [`RevisionDiff`]
//! (document id to the revisions it is missing). Both sides of that
//! exchange live here, along with the line parser for the continuous feed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ReplicationError, Result};
use crate::peer::ChangeRow;
use crate::task::FeedStyle;

/// Document id to the leaf revisions the feed reported for it.
///
/// Ordered map so request bodies and derived hashes are deterministic.
pub type RevisionMapping = BTreeMap<String, Vec<String>>;

/// Document id to the revisions the target is missing.
pub type RevisionDiff = BTreeMap<String, DiffEntry>;

/// One document's entry in a revision diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Revisions the target does not have.
    #[serde(default)]
    pub missing: Vec<String>,

    /// Revisions the target holds that could serve as merge ancestors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_ancestors: Vec<String>,
}

/// Collapse feed rows into a revision mapping.
///
/// When the same document appears in several rows of one page, only the
/// most recent row's revisions survive.
pub fn mapping_from_rows(rows: &[ChangeRow]) -> RevisionMapping {
    let mut mapping = RevisionMapping::new();
    for row in rows {
        let revs: Vec<String> = row.changes.iter().map(|c| c.rev.clone()).collect();
        mapping.insert(row.id.clone(), revs);
    }
    mapping
}

/// Parse one line of a continuous change feed into a [`ChangeRow`].
///
/// The caller is expected to have dropped blank keep-alive lines and the
/// trailing `last_seq` line already; anything else that fails to parse
/// is a feed error carrying the offending line.
pub fn parse_change_line(line: &str) -> Result<ChangeRow> {
    serde_json::from_str(line)
        .map_err(|err| ReplicationError::FeedParse(format!("{err}: `{line}`")))
}

/// Merge a fresh diff page into an accumulated diff.
///
/// With [`FeedStyle::AllDocs`] later pages extend a document's missing
/// set (deduplicated, first-seen order kept) since every page reports
/// independent leaf revisions. With [`FeedStyle::MainOnly`] a later page
/// supersedes the earlier entry outright, matching the feed's
/// winner-only reporting.
pub fn merge_diff(acc: &mut RevisionDiff, page: RevisionDiff, style: FeedStyle) {
    for (doc_id, entry) in page {
        match style {
            FeedStyle::AllDocs => {
                let slot = acc.entry(doc_id).or_default();
                for rev in entry.missing {
                    if !slot.missing.contains(&rev) {
                        slot.missing.push(rev);
                    }
                }
                for rev in entry.possible_ancestors {
                    if !slot.possible_ancestors.contains(&rev) {
                        slot.possible_ancestors.push(rev);
                    }
                }
            }
            FeedStyle::MainOnly => {
                acc.insert(doc_id, entry);
            }
        }
    }
}
