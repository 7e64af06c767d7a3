// src/sink.rs
//
// The downstream half of the pipeline: the ApplySink trait the orchestrator
// drives, the outcome-interpretation rules, and the production MongoDB sink.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson};
use mongodb::Client;
use tracing::debug;

use crate::error::ReplayError;
use crate::types::Operation;

/// Applies one ordered batch of operations against the target server.
///
/// A sink reports per-operation success through [`ApplyOutcome`]; errors from
/// `apply` itself mean the batch never produced a usable result (transport
/// failure, command rejected outright). Whether operations after a failed one
/// in the same batch were applied is left unspecified by the sink contract.
#[async_trait]
pub trait ApplySink: Send + Sync {
    async fn apply(&self, batch: &[Operation]) -> Result<ApplyOutcome>;
}

/// Per-batch reply from a sink: one success flag per operation, in batch
/// order, plus the server's aggregate applied count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub results: Vec<bool>,
    pub applied: i64,
}

/// Interpret a sink reply against the batch that produced it.
///
/// The first `false` identifies the failing operation and ends
/// interpretation; nothing past it is trusted either way. An all-`true`
/// reply whose applied count disagrees with the batch size is a protocol
/// violation, as is a result list of the wrong length.
pub fn check_outcome(batch: &[Operation], outcome: &ApplyOutcome) -> Result<(), ReplayError> {
    if outcome.results.len() != batch.len() {
        return Err(ReplayError::SinkProtocol(format!(
            "sink returned {} results for a batch of {}",
            outcome.results.len(),
            batch.len()
        )));
    }

    for (index, (op, ok)) in batch.iter().zip(&outcome.results).enumerate() {
        if !ok {
            return Err(ReplayError::FailedOperation {
                index,
                op: op.describe(),
            });
        }
    }

    if outcome.applied != batch.len() as i64 {
        return Err(ReplayError::SinkProtocol(format!(
            "sink applied {} of {} operations",
            outcome.applied,
            batch.len()
        )));
    }

    Ok(())
}

/// Production sink: one `applyOps` command per batch against the target
/// server's `admin` database.
pub struct MongoSink {
    client: Client,
    always_upsert: bool,
}

impl MongoSink {
    /// Connect to the target host. Bare host names get a `mongodb://`
    /// scheme; full connection URIs pass through untouched.
    ///
    /// With `always_upsert` set, updates that match no document are turned
    /// into inserts by the server instead of failing.
    pub async fn connect(host: &str, always_upsert: bool) -> Result<Self> {
        let uri = if host.contains("://") {
            host.to_string()
        } else {
            format!("mongodb://{host}")
        };
        let client = Client::with_uri_str(&uri)
            .await
            .with_context(|| format!("failed to connect to {uri}"))?;
        Ok(Self {
            client,
            always_upsert,
        })
    }
}

#[async_trait]
impl ApplySink for MongoSink {
    async fn apply(&self, batch: &[Operation]) -> Result<ApplyOutcome> {
        let ops: Vec<Bson> = batch
            .iter()
            .map(|op| Bson::Document(op.doc.clone()))
            .collect();

        let reply = self
            .client
            .database("admin")
            .run_command(doc! { "applyOps": ops, "alwaysUpsert": self.always_upsert })
            .await
            .context("applyOps command failed")?;

        debug!("applyOps reply: {}", reply);

        let raw_results = reply
            .get_array("results")
            .with_context(|| format!("applyOps reply has no results array: {reply}"))?;
        let mut results = Vec::with_capacity(raw_results.len());
        for value in raw_results {
            match value {
                Bson::Boolean(ok) => results.push(*ok),
                other => bail!("non-boolean applyOps result entry: {other}"),
            }
        }

        let applied = match reply.get("applied") {
            Some(Bson::Int32(n)) => i64::from(*n),
            Some(Bson::Int64(n)) => *n,
            Some(Bson::Double(n)) => *n as i64,
            other => bail!("applyOps reply has no applied count (got {other:?})"),
        };

        Ok(ApplyOutcome { results, applied })
    }
}
