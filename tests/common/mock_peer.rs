//! In-memory peer for exercising the engine without a network.
//!
//! Behaves like one database on a small document store: holds documents
//! and their known revisions, serves a change feed (paginated and
//! scripted-continuous), answers revision diffs, accepts bulk and
//! multipart writes, and records every call for assertions.

use relaxed_replicator::peer::{
    BoxFuture, BulkDocStatus, BulkUpdateResponse, ChangeRev, ChangeRow, ChangeStream,
    ChangesOptions, ChangesPage, DocumentResponse, MultipartOutcome, PeerClient, PeerError,
    Sequence,
};
use relaxed_replicator::revision::{DiffEntry, RevisionDiff, RevisionMapping};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

pub struct MockPeer {
    server_id: String,
    db_name: String,
    exists: AtomicBool,
    update_seq: AtomicUsize,
    /// Latest body per document id (includes `_local/` and `_design/` docs).
    docs: RwLock<HashMap<String, Value>>,
    /// Every revision this peer has ever seen per document id.
    revs: RwLock<HashMap<String, Vec<String>>>,
    /// Source-side change feed rows, in feed order.
    changes: RwLock<Vec<ChangeRow>>,
    /// Scripted lines for the continuous feed.
    feed_lines: RwLock<VecDeque<String>>,
    /// Doc ids every bulk update reports as rejected.
    bulk_rejects: RwLock<Vec<String>>,
    /// Method names in call order.
    calls: RwLock<Vec<String>>,

    fail_info: AtomicBool,
    /// Non-zero: database-info calls fail with this HTTP status.
    fail_info_status: AtomicUsize,
    /// Non-zero: document lookups fail with this HTTP status.
    fail_find_status: AtomicUsize,
    /// Remaining transfer calls that fail with a connectivity error.
    fail_transfer: AtomicUsize,
    commit_called: AtomicBool,
}

impl MockPeer {
    pub fn new(db_name: &str) -> Self {
        Self {
            server_id: format!("http://mock.local/{db_name}"),
            db_name: db_name.to_string(),
            exists: AtomicBool::new(true),
            update_seq: AtomicUsize::new(0),
            docs: RwLock::new(HashMap::new()),
            revs: RwLock::new(HashMap::new()),
            changes: RwLock::new(Vec::new()),
            feed_lines: RwLock::new(VecDeque::new()),
            bulk_rejects: RwLock::new(Vec::new()),
            calls: RwLock::new(Vec::new()),
            fail_info: AtomicBool::new(false),
            fail_info_status: AtomicUsize::new(0),
            fail_find_status: AtomicUsize::new(0),
            fail_transfer: AtomicUsize::new(0),
            commit_called: AtomicBool::new(false),
        }
    }

    /// A peer whose database does not exist yet.
    pub fn absent(db_name: &str) -> Self {
        let peer = Self::new(db_name);
        peer.exists.store(false, Ordering::SeqCst);
        peer
    }

    /// Make every database-info call fail with a connectivity error.
    pub fn set_unreachable(&self) {
        self.fail_info.store(true, Ordering::SeqCst);
    }

    /// Make every database-info call fail with the given HTTP status.
    pub fn fail_info_with_status(&self, status: u16) {
        self.fail_info_status.store(status as usize, Ordering::SeqCst);
    }

    /// Make every document lookup fail with the given HTTP status.
    pub fn fail_find_with_status(&self, status: u16) {
        self.fail_find_status.store(status as usize, Ordering::SeqCst);
    }

    /// Fail the next `count` transfer calls with a connectivity error.
    pub fn fail_next_transfers(&self, count: usize) {
        self.fail_transfer.store(count, Ordering::SeqCst);
    }

    /// Report these doc ids as rejected on every bulk update, whether or
    /// not they were in the submitted batch.
    pub fn reject_bulk_docs(&self, doc_ids: &[&str]) {
        *self.bulk_rejects.write().unwrap() =
            doc_ids.iter().map(|id| id.to_string()).collect();
    }

    /// Seed one document revision and a matching change-feed row.
    pub fn add_doc(&self, doc_id: &str, rev: &str, body: Value) {
        let seq = self.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut full = body;
        full["_id"] = json!(doc_id);
        full["_rev"] = json!(rev);
        self.docs.write().unwrap().insert(doc_id.to_string(), full);
        self.revs
            .write()
            .unwrap()
            .entry(doc_id.to_string())
            .or_default()
            .push(rev.to_string());
        self.changes.write().unwrap().push(ChangeRow {
            id: doc_id.to_string(),
            seq: Sequence::from(seq as u64),
            changes: vec![ChangeRev {
                rev: rev.to_string(),
            }],
            deleted: false,
        });
    }

    /// Script one raw line onto the continuous feed.
    pub fn push_feed_line(&self, line: &str) {
        self.feed_lines
            .write()
            .unwrap()
            .push_back(line.to_string());
    }

    pub fn document(&self, doc_id: &str) -> Option<Value> {
        self.docs.read().unwrap().get(doc_id).cloned()
    }

    pub fn has_rev(&self, doc_id: &str, rev: &str) -> bool {
        self.revs
            .read()
            .unwrap()
            .get(doc_id)
            .map(|revs| revs.iter().any(|r| r == rev))
            .unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    pub fn commit_called(&self) -> bool {
        self.commit_called.load(Ordering::SeqCst)
    }

    pub fn database_exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    fn record(&self, method: &str) {
        self.calls.write().unwrap().push(method.to_string());
    }

    fn seq_as_u64(seq: &Sequence) -> u64 {
        seq.as_value().as_u64().unwrap_or(0)
    }

    fn store_doc(&self, body: &Value) {
        let (Some(id), Some(rev)) = (
            body.get("_id").and_then(Value::as_str),
            body.get("_rev").and_then(Value::as_str),
        ) else {
            return;
        };
        self.docs
            .write()
            .unwrap()
            .insert(id.to_string(), body.clone());
        let mut revs = self.revs.write().unwrap();
        let known = revs.entry(id.to_string()).or_default();
        if !known.iter().any(|r| r == rev) {
            known.push(rev.to_string());
        }
    }
}

fn rejected_status(id: &str) -> BulkDocStatus {
    BulkDocStatus {
        id: id.to_string(),
        rev: None,
        error: Some("forbidden".into()),
        reason: Some("rejected by validation".into()),
    }
}

struct ScriptedStream {
    lines: VecDeque<String>,
}

impl ChangeStream for ScriptedStream {
    fn next_line(&mut self) -> BoxFuture<'_, Option<String>> {
        let line = self.lines.pop_front();
        Box::pin(async move { Ok(line) })
    }
}

impl PeerClient for MockPeer {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn get_database_info(&self) -> BoxFuture<'_, Value> {
        self.record("get_database_info");
        Box::pin(async move {
            if self.fail_info.load(Ordering::SeqCst) {
                return Err(PeerError::Unreachable("connection refused".into()));
            }
            let status = self.fail_info_status.load(Ordering::SeqCst);
            if status != 0 {
                return Err(PeerError::Http {
                    path: format!("/{}", self.db_name),
                    status: status as u16,
                });
            }
            if !self.exists.load(Ordering::SeqCst) {
                return Err(PeerError::NotFound);
            }
            Ok(json!({
                "db_name": self.db_name,
                "instance_start_time": "1700000000000000",
                "update_seq": self.update_seq.load(Ordering::SeqCst),
            }))
        })
    }

    fn create_database(&self) -> BoxFuture<'_, ()> {
        self.record("create_database");
        Box::pin(async move {
            self.exists.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn find_document(&self, doc_id: &str) -> BoxFuture<'_, DocumentResponse> {
        self.record("find_document");
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            let status = self.fail_find_status.load(Ordering::SeqCst);
            if status != 0 {
                return Err(PeerError::Http {
                    path: format!("/{}/{}", self.db_name, doc_id),
                    status: status as u16,
                });
            }
            match self.docs.read().unwrap().get(&doc_id) {
                Some(body) => Ok(DocumentResponse {
                    status: 200,
                    body: Some(body.clone()),
                }),
                None => Ok(DocumentResponse {
                    status: 404,
                    body: None,
                }),
            }
        })
    }

    fn put_document(&self, path: &str, body: Value) -> BoxFuture<'_, DocumentResponse> {
        self.record("put_document");
        let path = path.to_string();
        Box::pin(async move {
            let mut stored = body;
            // Local documents get a store-assigned 0-N revision.
            if path.starts_with("_local/") {
                let next = match stored.get("_rev").and_then(Value::as_str) {
                    Some(rev) => {
                        let n: u64 = rev
                            .strip_prefix("0-")
                            .and_then(|n| n.parse().ok())
                            .unwrap_or(0);
                        format!("0-{}", n + 1)
                    }
                    None => "0-1".to_string(),
                };
                stored["_rev"] = json!(next);
            }
            stored["_id"] = json!(path);
            let rev = stored
                .get("_rev")
                .and_then(Value::as_str)
                .unwrap_or("0-1")
                .to_string();
            self.store_doc(&stored);
            Ok(DocumentResponse {
                status: 201,
                body: Some(json!({"ok": true, "id": path, "rev": rev})),
            })
        })
    }

    fn get_changes(&self, options: ChangesOptions) -> BoxFuture<'_, ChangesPage> {
        self.record("get_changes");
        Box::pin(async move {
            let since = Self::seq_as_u64(&options.since);
            let rows: Vec<ChangeRow> = self
                .changes
                .read()
                .unwrap()
                .iter()
                .filter(|row| Self::seq_as_u64(&row.seq) > since)
                .filter(|row| match &options.doc_ids {
                    Some(ids) => ids.contains(&row.id),
                    None => true,
                })
                .cloned()
                .collect();
            let limit = options.limit.unwrap_or(usize::MAX);
            let rows: Vec<ChangeRow> = rows.into_iter().take(limit).collect();
            let last_seq = rows
                .last()
                .map(|row| row.seq.clone())
                .unwrap_or_else(|| {
                    Sequence::from(self.update_seq.load(Ordering::SeqCst) as u64)
                });
            Ok(ChangesPage {
                results: rows,
                last_seq,
            })
        })
    }

    fn get_changes_stream(
        &self,
        _options: ChangesOptions,
    ) -> BoxFuture<'_, Box<dyn ChangeStream>> {
        self.record("get_changes_stream");
        Box::pin(async move {
            let lines = std::mem::take(&mut *self.feed_lines.write().unwrap());
            Ok(Box::new(ScriptedStream { lines }) as Box<dyn ChangeStream>)
        })
    }

    fn get_revision_difference(&self, mapping: RevisionMapping) -> BoxFuture<'_, RevisionDiff> {
        self.record("get_revision_difference");
        Box::pin(async move {
            let revs = self.revs.read().unwrap();
            let mut diff = RevisionDiff::new();
            for (doc_id, candidates) in mapping {
                let known = revs.get(&doc_id);
                let missing: Vec<String> = candidates
                    .into_iter()
                    .filter(|rev| {
                        known
                            .map(|k| !k.iter().any(|r| r == rev))
                            .unwrap_or(true)
                    })
                    .collect();
                if !missing.is_empty() {
                    diff.insert(
                        doc_id,
                        DiffEntry {
                            missing,
                            possible_ancestors: Vec::new(),
                        },
                    );
                }
            }
            Ok(diff)
        })
    }

    fn bulk_update(
        &self,
        docs: Vec<Value>,
        _new_edits: bool,
    ) -> BoxFuture<'_, BulkUpdateResponse> {
        self.record("bulk_update");
        Box::pin(async move {
            let rejects = self.bulk_rejects.read().unwrap().clone();
            let mut results = Vec::new();
            for doc in &docs {
                let id = doc.get("_id").and_then(Value::as_str).unwrap_or("");
                if rejects.iter().any(|r| r == id) {
                    results.push(rejected_status(id));
                } else {
                    self.store_doc(doc);
                }
            }
            // Rejections for ids never submitted model a misbehaving peer.
            for id in &rejects {
                let submitted = docs
                    .iter()
                    .any(|d| d.get("_id").and_then(Value::as_str) == Some(id.as_str()));
                if !submitted {
                    results.push(rejected_status(id));
                }
            }
            // new_edits=false reports only failures.
            Ok(BulkUpdateResponse {
                status: 201,
                results,
            })
        })
    }

    fn transfer_changed_documents<'a>(
        &'a self,
        doc_id: &str,
        revs: &[String],
        target: &'a dyn PeerClient,
    ) -> BoxFuture<'a, (Vec<Value>, Vec<MultipartOutcome>)> {
        self.record("transfer_changed_documents");
        let doc_id = doc_id.to_string();
        let revs = revs.to_vec();
        Box::pin(async move {
            let remaining = self.fail_transfer.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_transfer.store(remaining - 1, Ordering::SeqCst);
                return Err(PeerError::Unreachable("transfer interrupted".into()));
            }

            let body = self
                .docs
                .read()
                .unwrap()
                .get(&doc_id)
                .cloned()
                .ok_or(PeerError::NotFound)?;

            let mut bulk_bodies = Vec::new();
            let mut outcomes = Vec::new();
            for rev in revs {
                let mut doc = body.clone();
                doc["_rev"] = json!(rev);
                if doc.get("_attachments").is_some() {
                    // Attachment-bearing revisions go straight to the target.
                    let response = target.put_document(&doc_id, doc).await?;
                    outcomes.push(MultipartOutcome::Written {
                        rev,
                        status: response.status,
                    });
                } else {
                    bulk_bodies.push(doc);
                }
            }
            Ok((bulk_bodies, outcomes))
        })
    }

    fn ensure_full_commit(&self) -> BoxFuture<'_, ()> {
        self.record("ensure_full_commit");
        Box::pin(async move {
            self.commit_called.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}
