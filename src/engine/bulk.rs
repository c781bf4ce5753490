//! Bulk document buffer.
//!
//! Plain (attachment-free) documents accumulate here during a batch and
//! land on the target in one `_bulk_docs` request. Replication always
//! writes with new-edits disabled so source revision ids are applied
//! verbatim instead of being re-stamped by the target.

use serde_json::Value;

use crate::error::Result;
use crate::peer::{BulkUpdateResponse, PeerClient};

/// Buffers documents for batched writes to the target.
#[derive(Debug, Default)]
pub struct BulkUpdater {
    docs: Vec<Value>,
    new_edits: bool,
}

impl BulkUpdater {
    /// Create an empty buffer with new-edits disabled.
    pub fn new() -> Self {
        Self {
            docs: Vec::new(),
            new_edits: false,
        }
    }

    /// Override the new-edits flag (normal interactive writes only).
    pub fn set_new_edits(&mut self, new_edits: bool) {
        self.new_edits = new_edits;
    }

    pub fn update_document(&mut self, doc: Value) {
        self.docs.push(doc);
    }

    pub fn update_documents(&mut self, docs: Vec<Value>) {
        self.docs.extend(docs);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn clear(&mut self) {
        self.docs.clear();
    }

    /// Flush the whole buffer to the target in one request.
    ///
    /// The buffer is drained even on failure so a retry does not double
    /// up documents.
    pub async fn execute(&mut self, target: &dyn PeerClient) -> Result<BulkUpdateResponse> {
        let docs = std::mem::take(&mut self.docs);
        let path = format!("/{}/_bulk_docs", target.db_name());
        target
            .bulk_update(docs, self.new_edits)
            .await
            .map_err(|err| super::map_peer_error(err, "target", &path))
    }

    /// Flush the buffer in chunks of at most `limit` documents.
    ///
    /// Returns one response per chunk, in order. Stops at the first
    /// transport failure.
    pub async fn execute_by_limit(
        &mut self,
        target: &dyn PeerClient,
        limit: usize,
    ) -> Result<Vec<BulkUpdateResponse>> {
        let limit = limit.max(1);
        let docs = std::mem::take(&mut self.docs);
        let path = format!("/{}/_bulk_docs", target.db_name());
        let mut responses = Vec::new();
        for chunk in docs.chunks(limit) {
            let response = target
                .bulk_update(chunk.to_vec(), self.new_edits)
                .await
                .map_err(|err| super::map_peer_error(err, "target", &path))?;
            responses.push(response);
        }
        Ok(responses)
    }
}
