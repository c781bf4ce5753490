// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpointed document replication between two document-store peers.
//!
//! Implements the CouchDB-style replication protocol: verify both peers,
//! derive a deterministic replication id, compare checkpoint logs to find
//! the resume point, drain the source's change feed, ask the target which
//! revisions it is missing, move exactly those revisions (batched bulk
//! writes for plain documents, streamed multipart uploads for
//! attachment-bearing ones), and commit a new checkpoint on both peers.
//!
//! # Architecture
//!
//! ```text
//!                    ┌────────────────────┐
//!                    │     Replicator     │  assembly + cancel
//!                    └─────────┬──────────┘
//!                              │
//!                    ┌─────────▼──────────┐
//!                    │  ReplicationEngine │  state machine
//!                    └─────────┬──────────┘
//!           ┌──────────────────┼──────────────────┐
//!  ┌────────▼───────┐ ┌────────▼───────┐ ┌────────▼───────┐
//!  │  change feed   │ │ revision diff  │ │   checkpoint   │
//!  │ normal / cont. │ │  + transfer    │ │  compare/write │
//!  └────────┬───────┘ └────────┬───────┘ └────────┬───────┘
//!           └──────────────────┼──────────────────┘
//!                              │
//!                    ┌─────────▼──────────┐
//!                    │     PeerClient     │  transport trait
//!                    └────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relaxed_replicator::{ReplicationEngine, ReplicationTask};
//! # use relaxed_replicator::peer::PeerClient;
//! # async fn run<P: PeerClient, Q: PeerClient>(source: Arc<P>, target: Arc<Q>)
//! #     -> relaxed_replicator::Result<()> {
//!
//! let task = ReplicationTask::new().with_create_target(true);
//! let mut engine = ReplicationEngine::new(source, target, task);
//! let report = engine.start().await?;
//! println!("wrote {} documents", report.docs_written);
//! # Ok(())
//! # }
//! ```
//!
//! Both peers are handles implementing [`peer::PeerClient`]; the engine
//! itself never opens a socket, which is also how the test suite runs it
//! against in-memory stores.

pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod peer;
pub mod replicator;
pub mod revision;
pub mod task;

pub use checkpoint::{compare_replication_logs, HistoryEntry, ReplicationLog};
pub use engine::{CancelHandle, EngineState, ReplicationEngine, ReplicationReport};
pub use error::{ReplicationError, Result};
pub use peer::{PeerClient, Sequence};
pub use replicator::Replicator;
pub use task::{FeedStyle, ReplicationTask};
