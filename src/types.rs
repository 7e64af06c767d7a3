// src/types.rs
//
// Decoded form of one oplog entry. The entry keeps its full document so the
// sink can forward it verbatim; the typed fields exist so the pipeline has
// stable things to branch and pace on.

use bson::{Document, Timestamp};

use crate::error::ReplayError;

/// Operation kind from an oplog entry's `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

impl OpKind {
    fn from_code(code: &str) -> Result<Self, ReplayError> {
        match code {
            "i" => Ok(OpKind::Insert),
            "u" => Ok(OpKind::Update),
            "d" => Ok(OpKind::Delete),
            "c" => Ok(OpKind::Command),
            "n" => Ok(OpKind::Noop),
            other => Err(ReplayError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Insert => write!(f, "insert"),
            OpKind::Update => write!(f, "update"),
            OpKind::Delete => write!(f, "delete"),
            OpKind::Command => write!(f, "command"),
            OpKind::Noop => write!(f, "no-op"),
        }
    }
}

/// One decoded oplog entry.
///
/// `ts.time` is the wall-clock second the operation was captured at;
/// `ts.increment` is the intra-second ordinal, which pacing deliberately
/// ignores. The payload (`o`), optional filter (`o2`), and whatever else the
/// capture recorded stay inside `doc` untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub ns: String,
    pub ts: Timestamp,
    pub doc: Document,
}

impl Operation {
    /// Decode one framed record into an operation.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ReplayError> {
        let mut reader = bytes;
        let doc = Document::from_reader(&mut reader)?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: Document) -> Result<Self, ReplayError> {
        let kind = OpKind::from_code(
            doc.get_str("op")
                .map_err(|source| ReplayError::Field { field: "op", source })?,
        )?;
        let ns = doc
            .get_str("ns")
            .map_err(|source| ReplayError::Field { field: "ns", source })?
            .to_string();
        let ts = doc
            .get_timestamp("ts")
            .map_err(|source| ReplayError::Field { field: "ts", source })?;

        Ok(Self { kind, ns, ts, doc })
    }

    /// Wall-clock second of capture; the only part of the timestamp pacing
    /// looks at.
    pub fn event_seconds(&self) -> u32 {
        self.ts.time
    }

    /// Entries without a target namespace are never applied.
    pub fn is_noop(&self) -> bool {
        self.ns.is_empty()
    }

    /// Short human-readable identity for error messages.
    pub fn describe(&self) -> String {
        format!(
            "{} on {} at {}.{}",
            self.kind, self.ns, self.ts.time, self.ts.increment
        )
    }
}
