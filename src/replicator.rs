// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicator façade.
//!
//! Thin assembly layer over [`ReplicationEngine`]: hold a source peer, a
//! target peer, and a task, wire them together, run. Useful when the
//! three pieces arrive from different places (CLI flags, config files,
//! connection pools) and the caller wants presence checking in one spot.
//!
//! The cancel signal is sticky. Once [`cancel_replication`] fires, this
//! replicator stops its in-flight run at the next await point and any
//! later run stops immediately; build a fresh `Replicator` to start
//! over.
//!
//! [`cancel_replication`]: Replicator::cancel_replication

use std::sync::Arc;
use tokio::sync::watch;

use crate::engine::{CancelHandle, ReplicationEngine, ReplicationReport};
use crate::error::{ReplicationError, Result};
use crate::peer::PeerClient;
use crate::task::ReplicationTask;

/// Assembles and runs replications between a configured peer pair.
pub struct Replicator<S: PeerClient, T: PeerClient> {
    source: Option<Arc<S>>,
    target: Option<Arc<T>>,
    task: Option<ReplicationTask>,
    cancel_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: PeerClient, T: PeerClient> Default for Replicator<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PeerClient, T: PeerClient> Replicator<S, T> {
    /// Create an empty replicator; wire peers and a task before starting.
    pub fn new() -> Self {
        let (cancel_tx, shutdown_rx) = watch::channel(false);
        Self {
            source: None,
            target: None,
            task: None,
            cancel_tx: Arc::new(cancel_tx),
            shutdown_rx,
        }
    }

    pub fn set_source(&mut self, source: Arc<S>) {
        self.source = Some(source);
    }

    pub fn set_target(&mut self, target: Arc<T>) {
        self.target = Some(target);
    }

    pub fn set_task(&mut self, task: ReplicationTask) {
        self.task = Some(task);
    }

    pub fn source(&self) -> Option<&Arc<S>> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&Arc<T>> {
        self.target.as_ref()
    }

    pub fn task(&self) -> Option<&ReplicationTask> {
        self.task.as_ref()
    }

    /// Run one replication with the configured pieces.
    ///
    /// The task is carried back afterwards with its advanced cursor and
    /// derived replication id, so calling again resumes where the last
    /// run checkpointed.
    pub async fn start_replication(&mut self) -> Result<ReplicationReport> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| ReplicationError::Config("source peer is not defined".into()))?;
        let target = self
            .target
            .clone()
            .ok_or_else(|| ReplicationError::Config("target peer is not defined".into()))?;
        let task = self
            .task
            .clone()
            .ok_or_else(|| ReplicationError::Config("replication task is not defined".into()))?;
        task.validate()?;

        let mut engine = ReplicationEngine::with_shutdown(
            source,
            target,
            task,
            Arc::clone(&self.cancel_tx),
            self.shutdown_rx.clone(),
        );
        let result = engine.start().await;
        self.task = Some(engine.task().clone());
        result
    }

    /// Stop the in-flight run at its next await point.
    pub fn cancel_replication(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Handle for cancelling from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.cancel_tx))
    }
}
