// src/error.rs
//
// Typed error taxonomy for the replay core. Everything here is fatal to the
// current replay attempt; retrying is the caller's business.

use thiserror::Error;

/// Errors surfaced by the replay pipeline.
///
/// The variants keep "my data was rejected" (`FailedOperation`) distinct from
/// "the sink is misbehaving" (`SinkProtocol`, `Sink`) and from problems with
/// the input stream itself (`BadLengthPrefix`, `TruncatedStream`, `Decode`).
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The 4-byte prefix of a record does not describe a plausible length.
    #[error("record length prefix {0} is not a valid document length")]
    BadLengthPrefix(i32),

    /// The stream ended while a record was still incomplete.
    #[error("input ended mid-record with {0} bytes of an incomplete document buffered")]
    TruncatedStream(usize),

    /// A complete record's bytes did not form a valid BSON document.
    #[error("failed to decode oplog document: {0}")]
    Decode(#[from] bson::de::Error),

    /// A decoded document is missing a field the replay engine relies on.
    #[error("oplog entry field `{field}` missing or ill-typed: {source}")]
    Field {
        field: &'static str,
        source: bson::document::ValueAccessError,
    },

    /// The `op` field carried a code outside the known oplog vocabulary.
    #[error("unrecognized operation kind `{0}`")]
    UnknownKind(String),

    /// The sink reported a specific operation within a batch as not applied.
    #[error("operation {index} in batch failed to apply: {op}")]
    FailedOperation { index: usize, op: String },

    /// The sink's reply shape is inconsistent with the batch it was sent.
    #[error("sink protocol violation: {0}")]
    SinkProtocol(String),

    /// The apply call itself failed before producing a per-operation result.
    #[error("apply command failed: {0}")]
    Sink(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A pipeline stage task was aborted or panicked.
    #[error("pipeline stage failed: {0}")]
    Stage(#[from] tokio::task::JoinError),
}
