// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Continuous replication over the live line-delimited feed.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics;
use crate::peer::{ChangeRow, ChangesOptions, FeedMode, PeerClient};
use crate::revision::{mapping_from_rows, parse_change_line};

use super::{map_peer_error, ReplicationEngine, ReplicationReport};

/// Pause after a keep-alive or skipped line before the next read.
const IDLE_PAUSE: Duration = Duration::from_millis(200);

impl<S: PeerClient, T: PeerClient> ReplicationEngine<S, T> {
    /// Follow the live feed, replicating each change as it arrives.
    ///
    /// Runs until the stream ends, the feed's idle cutoff closes it, or
    /// a cancel signal arrives. Per-event failures are recorded and the
    /// loop keeps going; only losing the stream itself is fatal.
    ///
    /// Explicit doc-id allowlists are a normal-feed feature; the
    /// continuous feed ignores them.
    pub(crate) async fn replicate_continuous(
        &mut self,
        report: &mut ReplicationReport,
    ) -> Result<()> {
        let changes_path = format!("/{}/_changes", self.source.db_name());
        let since = self.task.since_seq().clone();

        let heartbeat = self.task.heartbeat();
        let timeout = match heartbeat {
            Some(_) => None,
            None => Some(self.task.effective_timeout()),
        };
        let options = ChangesOptions {
            feed: FeedMode::Continuous,
            style: self.task.style(),
            since: since.clone(),
            filter: self.task.filter().map(String::from),
            parameters: self.task.parameters().clone(),
            doc_ids: None,
            limit: None,
            heartbeat,
            timeout,
        };

        let mut stream = self
            .source
            .get_changes_stream(options)
            .await
            .map_err(|err| map_peer_error(err, "source", &changes_path))?;

        report.start_last_seq = Some(since.clone());
        let mut last_seq = since;
        let mut shutdown = self.shutdown_rx.clone();
        info!(since = %last_seq, "following continuous feed");

        loop {
            let line = tokio::select! {
                _ = shutdown.changed() => {
                    info!("cancel requested, leaving continuous feed");
                    break;
                }
                line = stream.next_line() => {
                    line.map_err(|err| map_peer_error(err, "source", &changes_path))?
                }
            };

            let line = match line {
                Some(line) => line,
                None => {
                    info!("continuous feed closed by peer");
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() || line.contains("\"last_seq\"") {
                metrics::record_continuous_event(self.source.db_name(), "skipped");
                sleep(IDLE_PAUSE).await;
                continue;
            }

            let row = match parse_change_line(line) {
                Ok(row) => row,
                Err(err) => {
                    warn!(error = %err, "skipping malformed feed line");
                    metrics::record_continuous_event(self.source.db_name(), "parse_error");
                    report.failure_count += 1;
                    continue;
                }
            };

            metrics::record_continuous_event(self.source.db_name(), "change");
            last_seq = row.seq.clone();
            match self.replicate_event(&row, report).await {
                Ok(()) => report.success_count += 1,
                Err(err) => {
                    debug!(doc_id = %row.id, error = %err, "event replication failed");
                    report.failure_count += 1;
                    report.record_error(&row.id, err.to_string());
                }
            }
            report.end_last_seq = Some(last_seq.clone());
            self.task.set_since_seq(last_seq.clone());
        }

        report.end_last_seq = Some(last_seq);
        Ok(())
    }

    /// Replicate the single change one feed event describes.
    async fn replicate_event(
        &self,
        row: &ChangeRow,
        report: &mut ReplicationReport,
    ) -> Result<()> {
        let diff_path = format!("/{}/_revs_diff", self.target.db_name());

        report.missing_checked += row.changes.len() as u64;
        metrics::record_missing_checked(self.target.db_name(), row.changes.len());

        let mapping = mapping_from_rows(std::slice::from_ref(row));
        let diff = self
            .target
            .get_revision_difference(mapping)
            .await
            .map_err(|err| map_peer_error(err, "target", &diff_path))?;
        if diff.is_empty() {
            return Ok(());
        }
        self.replicate_changes(&diff, report).await
    }
}
