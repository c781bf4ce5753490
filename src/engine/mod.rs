// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine.
//!
//! Drives one replication run between a source and a target peer through
//! a strict state machine:
//!
//! ```text
//! Created ─▶ VerifyingPeers ─▶ Replicating ─▶ WritingCheckpoint ─▶ Completed
//!                  │                │                 │
//!                  └────────────────┴─────────────────┴──▶ Failed
//! ```
//!
//! `Failed` is reached on any fatal error and no checkpoint is written,
//! so the next run resumes from the last committed sequence. Non-fatal
//! per-document failures are recorded in the [`ReplicationReport`] and
//! the run keeps going.
//!
//! The engine is transport-agnostic: both peers are [`PeerClient`]
//! handles and all protocol traffic flows through that trait.

mod bulk;
mod continuous;
mod normal;
mod types;

pub use bulk::BulkUpdater;
pub use types::{EngineState, ReplicationReport};

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::checkpoint::{
    compare_replication_logs, history_timestamp, new_session_id, HistoryEntry, ReplicationLog,
    REPLICATION_ID_VERSION,
};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::peer::{MultipartOutcome, PeerClient, PeerError, Sequence};
use crate::revision::RevisionDiff;
use crate::task::ReplicationTask;

/// Pause before retrying a document transfer after a connectivity failure.
const TRANSFER_RETRY_PAUSE: Duration = Duration::from_micros(500);

/// Map a transport failure into the engine taxonomy.
///
/// 404s that reach this point were not handled as data by the caller, so
/// they surface as HTTP errors like any other status.
pub(crate) fn map_peer_error(err: PeerError, peer: &'static str, path: &str) -> ReplicationError {
    match err {
        PeerError::NotFound => ReplicationError::http(path, 404),
        PeerError::Http { path, status } => ReplicationError::Http { path, status },
        PeerError::Unreachable(_) => ReplicationError::PeerUnreachable { peer },
    }
}

/// Cancels a running replication from outside the engine task.
///
/// Cloneable and cheap; cancelling an already-finished run is a no-op.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    /// Signal the engine to stop at the next await point.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// One replication run between a source and a target peer.
pub struct ReplicationEngine<S: PeerClient, T: PeerClient> {
    pub(crate) source: Arc<S>,
    pub(crate) target: Arc<T>,
    pub(crate) task: ReplicationTask,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    cancel_tx: Arc<watch::Sender<bool>>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,

    pub(crate) source_log: Option<ReplicationLog>,
    pub(crate) target_log: Option<ReplicationLog>,

    started_at: String,
}

impl<S: PeerClient, T: PeerClient> ReplicationEngine<S, T> {
    /// Create an engine with its own cancellation channel.
    pub fn new(source: Arc<S>, target: Arc<T>, task: ReplicationTask) -> Self {
        let (cancel_tx, shutdown_rx) = watch::channel(false);
        Self::with_shutdown(source, target, task, Arc::new(cancel_tx), shutdown_rx)
    }

    /// Create an engine wired to an external cancellation channel.
    pub fn with_shutdown(
        source: Arc<S>,
        target: Arc<T>,
        task: ReplicationTask,
        cancel_tx: Arc<watch::Sender<bool>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        Self {
            source,
            target,
            task,
            state_tx,
            state_rx,
            cancel_tx,
            shutdown_rx,
            source_log: None,
            target_log: None,
            started_at: history_timestamp(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Handle for cancelling this run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// The task driving this run.
    pub fn task(&self) -> &ReplicationTask {
        &self.task
    }

    fn set_state(&self, state: EngineState) {
        info!(state = %state, "engine state transition");
        metrics::set_engine_state(&state.to_string());
        let _ = self.state_tx.send(state);
    }

    /// Run the replication to completion.
    ///
    /// Fatal errors flip the engine to `Failed` and are returned; the
    /// checkpoint is only written after a clean replication pass.
    pub async fn start(&mut self) -> Result<ReplicationReport> {
        self.started_at = history_timestamp();
        match self.run().await {
            Ok(report) => {
                self.set_state(EngineState::Completed);
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "replication run failed");
                self.set_state(EngineState::Failed);
                Err(err)
            }
        }
    }

    async fn run(&mut self) -> Result<ReplicationReport> {
        self.set_state(EngineState::VerifyingPeers);
        self.verify_peers().await?;

        let replication_id = self.generate_replication_id().await?;
        info!(replication_id = %replication_id, "derived replication id");
        self.task.set_replication_id(replication_id.clone());

        self.source_log = self
            .get_replication_log(self.source.as_ref(), "source", &replication_id)
            .await?;
        self.target_log = self
            .get_replication_log(self.target.as_ref(), "target", &replication_id)
            .await?;

        let since = compare_replication_logs(
            self.source_log.as_ref(),
            self.target_log.as_ref(),
            self.task.since_seq(),
        );
        info!(since = %since, "resuming change feed");
        self.task.set_since_seq(since);

        self.set_state(EngineState::Replicating);
        let mut report = ReplicationReport::new();
        if self.task.is_continuous() {
            self.replicate_continuous(&mut report).await?;
        } else {
            self.replicate_normal(&mut report).await?;
        }

        self.set_state(EngineState::WritingCheckpoint);
        self.put_replication_log(&report).await?;

        let commit_path = format!("/{}/_ensure_full_commit", self.target.db_name());
        self.target
            .ensure_full_commit()
            .await
            .map_err(|err| map_peer_error(err, "target", &commit_path))?;

        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Peer verification
    // ─────────────────────────────────────────────────────────────────────

    async fn verify_peers(&self) -> Result<()> {
        let info = self
            .source
            .get_database_info()
            .await
            .map_err(|_| ReplicationError::PeerUnreachable { peer: "source" })?;
        require_info_fields(&info, self.source.db_name())?;
        debug!(db = self.source.db_name(), "source peer verified");

        let info = match self.target.get_database_info().await {
            Ok(info) => info,
            Err(PeerError::NotFound) if self.task.create_target() => {
                info!(db = self.target.db_name(), "creating missing target database");
                self.target
                    .create_database()
                    .await
                    .map_err(|_| ReplicationError::PeerUnreachable { peer: "target" })?;
                self.target
                    .get_database_info()
                    .await
                    .map_err(|_| ReplicationError::PeerUnreachable { peer: "target" })?
            }
            // Only absence and connectivity collapse into PeerUnreachable;
            // other HTTP failures keep their path and status.
            Err(PeerError::Http { path, status }) => {
                return Err(ReplicationError::Http { path, status });
            }
            Err(_) => return Err(ReplicationError::PeerUnreachable { peer: "target" }),
        };
        require_info_fields(&info, self.target.db_name())?;
        debug!(db = self.target.db_name(), "target peer verified");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Replication id
    // ─────────────────────────────────────────────────────────────────────

    /// Derive the deterministic replication id for this peer pair and
    /// task shape.
    ///
    /// Folds in the source server identity, both database names, the
    /// doc-id allowlist, the create-target and continuous flags, the
    /// filter name and its current source text, the feed style, and the
    /// heartbeat. Any change to one of these yields a new id and so a
    /// fresh checkpoint lineage.
    async fn generate_replication_id(&self) -> Result<String> {
        let filter_code = self.fetch_filter_code().await?;
        let components = [
            self.source.server_id().to_string(),
            self.source.db_name().to_string(),
            self.target.db_name().to_string(),
            serde_json::to_string(&self.task.doc_ids()).unwrap_or_default(),
            flag(self.task.create_target()),
            flag(self.task.is_continuous()),
            self.task.filter().unwrap_or_default().to_string(),
            filter_code,
            self.task.style().as_str().to_string(),
            serde_json::to_string(&self.task.heartbeat()).unwrap_or_default(),
        ];
        Ok(digest_components(&components))
    }

    /// Fetch the source text of a user-defined filter function.
    ///
    /// Reserved `_`-prefixed filters have no source, and parameterized
    /// filters are identified by their parameters instead, so both skip
    /// the fetch. A design document that cannot be read fails the run;
    /// a readable document without the named function contributes an
    /// empty string.
    async fn fetch_filter_code(&self) -> Result<String> {
        let filter = match self.task.filter() {
            Some(f) if !f.starts_with('_') && self.task.parameters().is_empty() => f,
            _ => return Ok(String::new()),
        };
        let (design, function) = match filter.split_once('/') {
            Some(parts) => parts,
            None => return Ok(String::new()),
        };
        let doc_id = format!("_design/{design}");
        let path = format!("/{}/{}", self.source.db_name(), doc_id);
        let response = self
            .source
            .find_document(&doc_id)
            .await
            .map_err(|err| map_peer_error(err, "source", &path))?;
        if !response.is_success() {
            return Err(ReplicationError::http(path, response.status));
        }
        let code = response
            .body
            .as_ref()
            .and_then(|body| body.get("filters"))
            .and_then(|filters| filters.get(function))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(code.to_string())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Checkpoints
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch one peer's checkpoint document, treating 404 as absent.
    async fn get_replication_log(
        &self,
        peer: &dyn PeerClient,
        peer_name: &'static str,
        replication_id: &str,
    ) -> Result<Option<ReplicationLog>> {
        let doc_id = format!("_local/{replication_id}");
        let path = format!("/{}/{}", peer.db_name(), doc_id);
        let response = peer
            .find_document(&doc_id)
            .await
            .map_err(|err| map_peer_error(err, peer_name, &path))?;
        if response.is_not_found() {
            debug!(peer = peer_name, "no checkpoint on peer");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(ReplicationError::http(path, response.status));
        }
        let body = response
            .body
            .ok_or_else(|| ReplicationError::missing_field("body", path.clone()))?;
        Ok(Some(ReplicationLog::from_value(body, &path)?))
    }

    /// Write the session checkpoint to both peers.
    ///
    /// Each peer gets the new session prepended to whatever history it
    /// already held, carrying that peer's own `_rev` so the local
    /// document updates in place.
    ///
    /// A fully drained one-shot run records the source's current
    /// `update_seq`. Continuous and cancelled runs stopped mid-feed, so
    /// they record the last sequence actually processed instead.
    async fn put_replication_log(&mut self, report: &ReplicationReport) -> Result<()> {
        let replication_id = self
            .task
            .replication_id()
            .ok_or_else(|| ReplicationError::Config("replication id not derived".into()))?
            .to_string();
        let session_id = new_session_id();

        let processed_seq = report
            .end_last_seq
            .clone()
            .unwrap_or_else(|| self.task.since_seq().clone());
        let cancelled = *self.shutdown_rx.borrow();
        let recorded_seq = if self.task.is_continuous() || cancelled {
            processed_seq
        } else {
            self.current_source_seq().await?
        };

        let entry = HistoryEntry {
            session_id: session_id.clone(),
            recorded_seq: recorded_seq.clone(),
            start_time: self.started_at.clone(),
            end_time: history_timestamp(),
            docs_read: Some(report.docs_read),
            docs_written: Some(report.docs_written),
            doc_write_failures: Some(report.doc_write_failures),
            missing_checked: Some(report.missing_checked),
            missing_found: Some(report.missing_found),
            start_last_seq: report.start_last_seq.clone(),
            end_last_seq: report.end_last_seq.clone(),
        };

        let source_log = self.source_log.take();
        self.write_checkpoint(
            self.source.as_ref(),
            "source",
            &replication_id,
            &session_id,
            &recorded_seq,
            &entry,
            source_log,
        )
        .await?;
        let target_log = self.target_log.take();
        self.write_checkpoint(
            self.target.as_ref(),
            "target",
            &replication_id,
            &session_id,
            &recorded_seq,
            &entry,
            target_log,
        )
        .await?;
        Ok(())
    }

    /// The source's current feed head.
    async fn current_source_seq(&self) -> Result<Sequence> {
        let info = self
            .source
            .get_database_info()
            .await
            .map_err(|_| ReplicationError::PeerUnreachable { peer: "source" })?;
        let seq = info
            .get("update_seq")
            .cloned()
            .ok_or_else(|| {
                ReplicationError::missing_field(
                    "update_seq",
                    format!("/{}", self.source.db_name()),
                )
            })?;
        Ok(Sequence::from_value(seq))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_checkpoint(
        &self,
        peer: &dyn PeerClient,
        peer_name: &'static str,
        replication_id: &str,
        session_id: &str,
        recorded_seq: &Sequence,
        entry: &HistoryEntry,
        prior: Option<ReplicationLog>,
    ) -> Result<()> {
        let doc_id = format!("_local/{replication_id}");
        let path = format!("/{}/{}", peer.db_name(), doc_id);

        let mut history = vec![entry.clone()];
        let rev = prior.map(|log| {
            history.extend(log.history);
            log.rev
        });
        let log = ReplicationLog {
            id: doc_id.clone(),
            rev: rev.flatten(),
            session_id: session_id.to_string(),
            source_last_seq: recorded_seq.clone(),
            history,
            replication_id_version: REPLICATION_ID_VERSION,
        };

        let body = serde_json::to_value(&log)
            .map_err(|err| ReplicationError::Config(format!("unserializable checkpoint: {err}")))?;
        let result = peer
            .put_document(&doc_id, body)
            .await
            .map_err(|err| map_peer_error(err, peer_name, &path));
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                metrics::record_checkpoint_write(peer.db_name(), false);
                return Err(err);
            }
        };
        if response.status != 201 {
            metrics::record_checkpoint_write(peer.db_name(), false);
            return Err(ReplicationError::http(path, response.status));
        }
        metrics::record_checkpoint_write(peer.db_name(), true);
        info!(peer = peer_name, seq = %recorded_seq, "checkpoint written");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Document transfer
    // ─────────────────────────────────────────────────────────────────────

    /// Move every revision in `diff` from source to target.
    ///
    /// Plain bodies buffer into bulk batches of at most the task's bulk
    /// limit; attachment-bearing revisions stream straight to the target
    /// during the transfer call and report through multipart outcomes.
    pub(crate) async fn replicate_changes(
        &self,
        diff: &RevisionDiff,
        report: &mut ReplicationReport,
    ) -> Result<()> {
        let limit = self.task.bulk_docs_limit();
        let mut updater = BulkUpdater::new();
        let mut batch_ids: Vec<String> = Vec::new();
        let mut batch_bodies = 0usize;

        for (doc_id, entry) in diff {
            report.docs_read += 1;
            report.missing_found += entry.missing.len() as u64;
            metrics::record_docs_read(self.source.db_name(), 1);
            metrics::record_missing_found(self.target.db_name(), entry.missing.len());

            match self.transfer_with_retry(doc_id, &entry.missing).await {
                Ok((bodies, outcomes)) => {
                    if !bodies.is_empty() {
                        batch_bodies += bodies.len();
                        updater.update_documents(bodies);
                        batch_ids.push(doc_id.clone());
                    }
                    report.record_multipart(doc_id, outcomes);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    report.record_error(doc_id, err.to_string());
                    report.doc_write_failures += entry.missing.len() as u64;
                    metrics::record_doc_write_failures(
                        self.target.db_name(),
                        entry.missing.len(),
                    );
                }
            }

            if batch_bodies >= limit {
                self.flush_bulk(&mut updater, &mut batch_ids, &mut batch_bodies, report)
                    .await?;
            }
        }

        if !updater.is_empty() {
            self.flush_bulk(&mut updater, &mut batch_ids, &mut batch_bodies, report)
                .await?;
        }
        Ok(())
    }

    /// Transfer one document's missing revisions, retrying once after a
    /// connectivity failure.
    async fn transfer_with_retry(
        &self,
        doc_id: &str,
        revs: &[String],
    ) -> Result<(Vec<Value>, Vec<MultipartOutcome>)> {
        let target: &dyn PeerClient = self.target.as_ref();
        match self
            .source
            .transfer_changed_documents(doc_id, revs, target)
            .await
        {
            Ok(result) => Ok(result),
            Err(err) if err.is_connectivity() => {
                metrics::record_transfer_retry(self.source.db_name(), doc_id);
                debug!(doc_id, error = %err, "transfer failed, retrying once");
                tokio::time::sleep(TRANSFER_RETRY_PAUSE).await;
                self.source
                    .transfer_changed_documents(doc_id, revs, target)
                    .await
                    .map_err(|err| ReplicationError::transfer(doc_id, err.to_string()))
            }
            Err(PeerError::Http { path, status }) if status >= 500 => {
                Err(ReplicationError::Http { path, status })
            }
            Err(err) => Err(ReplicationError::transfer(doc_id, err.to_string())),
        }
    }

    async fn flush_bulk(
        &self,
        updater: &mut BulkUpdater,
        batch_ids: &mut Vec<String>,
        batch_bodies: &mut usize,
        report: &mut ReplicationReport,
    ) -> Result<()> {
        let started = std::time::Instant::now();
        let size = updater.len();
        let target: &dyn PeerClient = self.target.as_ref();
        let response = updater.execute(target).await?;
        metrics::record_bulk_batch(self.target.db_name(), size, started.elapsed());

        if !response.is_success() {
            let path = format!("/{}/_bulk_docs", self.target.db_name());
            return Err(ReplicationError::http(path, response.status));
        }

        // With new-edits disabled the peer only reports failures; every
        // body not named in the results landed.
        let mut failures = 0usize;
        for line in &response.results {
            if line.is_error() {
                failures += 1;
                let message = line
                    .reason
                    .clone()
                    .or_else(|| line.error.clone())
                    .unwrap_or_else(|| "bulk write rejected".to_string());
                report.record_error(&line.id, message);
            }
        }
        let written = batch_bodies.saturating_sub(failures);
        report.docs_written += written as u64;
        report.doc_write_failures += failures as u64;
        metrics::record_docs_written(self.target.db_name(), written);
        metrics::record_doc_write_failures(self.target.db_name(), failures);
        report.record_bulk_status(batch_ids, response.status);

        batch_ids.clear();
        *batch_bodies = 0;
        Ok(())
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// Validate a database-info body for the protocol-required fields.
fn require_info_fields(info: &Value, db: &str) -> Result<()> {
    for field in ["db_name", "instance_start_time", "update_seq"] {
        if info.get(field).is_none() {
            return Err(ReplicationError::missing_field(field, format!("/{db}")));
        }
    }
    Ok(())
}

/// Hash ordered id components into a hex digest.
fn digest_components(components: &[String]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
        // Delimiter keeps ("ab","c") distinct from ("a","bc").
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}
