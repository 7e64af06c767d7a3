//! oplog-replay: replay a captured MongoDB oplog against a live server.
//!
//! The input is the raw byte stream `mongodump` produces for the oplog
//! collection: BSON documents back to back, no delimiters. The replay core
//! frames that stream, decodes each entry, paces it (at the original
//! relative timing or a fixed throughput), batches paced entries, and
//! applies each batch through an [`ApplySink`], stopping at the first
//! operation that fails to apply.
//!
//! # Replaying a stream
//!
//! ```no_run
//! use oplog_replay::{controller_for, replay_oplog, MongoSink, ReplayMode};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let input = tokio::fs::File::open("oplog.bson").await?;
//! let controller = controller_for(ReplayMode::Relative, 2.0)?;
//! let sink = Arc::new(MongoSink::connect("localhost", false).await?);
//! replay_oplog(input, controller, sink).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Custom sink
//!
//! Anything implementing [`ApplySink`] can stand in for a real server; the
//! pipeline only cares about the per-operation results it reports.
//!
//! ```
//! use oplog_replay::{ApplyOutcome, ApplySink, Operation};
//! use async_trait::async_trait;
//!
//! struct DryRun;
//!
//! #[async_trait]
//! impl ApplySink for DryRun {
//!     async fn apply(&self, batch: &[Operation]) -> anyhow::Result<ApplyOutcome> {
//!         for op in batch {
//!             println!("would apply {}", op.describe());
//!         }
//!         Ok(ApplyOutcome {
//!             results: vec![true; batch.len()],
//!             applied: batch.len() as i64,
//!         })
//!     }
//! }
//! ```

pub mod constants;
pub mod error;
pub mod rate;
pub mod replay;
pub mod scanner;
pub mod sink;
pub mod types;

// Re-export the main types and functions for convenience.
pub use error::ReplayError;
pub use rate::{controller_for, FixedRate, RateController, RelativeRate, ReplayMode};
pub use replay::replay_oplog;
pub use scanner::RecordScanner;
pub use sink::{check_outcome, ApplyOutcome, ApplySink, MongoSink};
pub use types::{OpKind, Operation};
