//! One-shot replication over the paginated normal feed.

use std::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::metrics;
use crate::peer::{ChangesOptions, FeedMode, PeerClient};
use crate::revision::{mapping_from_rows, merge_diff, RevisionDiff};

use super::{map_peer_error, EngineState, ReplicationEngine, ReplicationReport};

impl<S: PeerClient, T: PeerClient> ReplicationEngine<S, T> {
    /// Drain the change feed page by page, then move everything the
    /// target is missing in one transfer pass.
    ///
    /// The drain stops when a page comes back empty, when the feed's
    /// reported `last_seq` no longer matches a row in the page, when a
    /// page is shorter than the requested limit, or when the cursor
    /// stops advancing. A cancel signal between pages stops the drain
    /// early; whatever was collected still replicates and checkpoints.
    pub(crate) async fn replicate_normal(&mut self, report: &mut ReplicationReport) -> Result<()> {
        let changes_path = format!("/{}/_changes", self.source.db_name());
        let diff_path = format!("/{}/_revs_diff", self.target.db_name());
        let limit = self.task.changes_limit();

        let mut since = self.task.since_seq().clone();
        let mut diff = RevisionDiff::new();

        loop {
            if *self.shutdown_rx.borrow() {
                info!("cancel requested, stopping feed drain");
                break;
            }

            let options = ChangesOptions {
                feed: FeedMode::Normal,
                style: self.task.style(),
                since: since.clone(),
                filter: self.task.filter().map(String::from),
                parameters: self.task.parameters().clone(),
                doc_ids: self.task.doc_ids().map(<[String]>::to_vec),
                limit: Some(limit),
                heartbeat: None,
                timeout: None,
            };

            let started = Instant::now();
            let page = self
                .source
                .get_changes(options)
                .await
                .map_err(|err| map_peer_error(err, "source", &changes_path))?;
            metrics::record_feed_page(
                self.source.db_name(),
                page.results.len(),
                started.elapsed(),
            );

            if report.start_last_seq.is_none() {
                report.start_last_seq = Some(since.clone());
            }

            if page.results.is_empty() {
                since = page.last_seq;
                break;
            }

            let revisions: usize = page.results.iter().map(|row| row.changes.len()).sum();
            report.missing_checked += revisions as u64;
            metrics::record_missing_checked(self.target.db_name(), revisions);

            let mapping = mapping_from_rows(&page.results);
            let page_diff = self
                .target
                .get_revision_difference(mapping)
                .await
                .map_err(|err| map_peer_error(err, "target", &diff_path))?;
            merge_diff(&mut diff, page_diff, self.task.style());

            let short_page = page.results.len() < limit;
            let seq_in_page = page.results.iter().any(|row| row.seq == page.last_seq);
            let advanced = page.last_seq != since;
            since = page.last_seq;

            if short_page || !seq_in_page || !advanced {
                debug!(
                    short_page,
                    seq_in_page, advanced, "feed drained, stopping pagination"
                );
                break;
            }
        }

        report.end_last_seq = Some(since.clone());
        self.task.set_since_seq(since);
        debug_assert_eq!(self.state(), EngineState::Replicating);

        info!(
            documents = diff.len(),
            missing = report.missing_checked,
            "feed drained, transferring missing revisions"
        );
        self.replicate_changes(&diff, report).await
    }
}
