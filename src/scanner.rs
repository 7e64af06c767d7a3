// src/scanner.rs
//
// Streaming frame extractor for mongodump-style BSON streams.
//
// mongodump writes documents back to back with no delimiter between them.
// Every document opens with a 4-byte little-endian length that counts the
// whole document, those 4 bytes included, so the stream can be split without
// understanding anything else about its contents.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::constants::LENGTH_PREFIX_LEN;
use crate::error::ReplayError;

/// Splits an undelimited byte stream into whole BSON documents.
///
/// Drive it with [`tokio_util::codec::FramedRead`]. Each yielded frame is the
/// exact bytes of one document, length prefix included, handed back as a view
/// into the read buffer. Only the current (possibly incomplete) record is
/// ever resident in memory.
#[derive(Debug, Default)]
pub struct RecordScanner;

impl RecordScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RecordScanner {
    type Item = Bytes;
    type Error = ReplayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ReplayError> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let declared = i32::from_le_bytes(prefix);

        // A document can never be shorter than its own length prefix.
        if declared < LENGTH_PREFIX_LEN as i32 {
            return Err(ReplayError::BadLengthPrefix(declared));
        }

        let len = declared as usize;
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ReplayError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ReplayError::TruncatedStream(src.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn encode(docs: &[bson::Document]) -> Vec<u8> {
        let mut out = Vec::new();
        for doc in docs {
            out.extend(bson::to_vec(doc).unwrap());
        }
        out
    }

    #[test]
    fn round_trips_concatenated_documents() {
        let docs = vec![
            doc! { "op": "c", "ns": "testdb.$cmd", "o": { "create": "test" } },
            doc! { "op": "i", "ns": "testdb.test", "o": { "message": "insert test", "number": 1 } },
            doc! { "op": "d", "ns": "testdb.test", "b": true, "o": { "number": 1 } },
        ];
        let raw = encode(&docs);
        let expected: Vec<Vec<u8>> = docs.iter().map(|d| bson::to_vec(d).unwrap()).collect();

        let mut scanner = RecordScanner::new();
        let mut buf = BytesMut::from(&raw[..]);
        let mut frames = Vec::new();
        while let Some(frame) = scanner.decode(&mut buf).unwrap() {
            frames.push(frame.to_vec());
        }
        assert!(scanner.decode_eof(&mut buf).unwrap().is_none());
        assert_eq!(frames, expected);
    }

    #[test]
    fn asks_for_more_data_on_partial_input() {
        let raw = bson::to_vec(&doc! { "op": "n", "ns": "", "o": { "msg": "nop" } }).unwrap();
        let mut scanner = RecordScanner::new();

        // Fewer than 4 bytes: not even the prefix is readable yet.
        let mut buf = BytesMut::from(&raw[..2]);
        assert!(scanner.decode(&mut buf).unwrap().is_none());

        // Prefix present but the body is short one byte.
        let mut buf = BytesMut::from(&raw[..raw.len() - 1]);
        assert!(scanner.decode(&mut buf).unwrap().is_none());

        // The final byte completes the record.
        buf.extend_from_slice(&raw[raw.len() - 1..]);
        let frame = scanner.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &raw[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn detects_truncated_stream_at_eof() {
        let raw = bson::to_vec(&doc! { "op": "i", "ns": "db.c", "o": { "x": 1 } }).unwrap();
        let mut scanner = RecordScanner::new();
        let mut buf = BytesMut::from(&raw[..raw.len() / 2]);

        assert!(scanner.decode(&mut buf).unwrap().is_none());
        match scanner.decode_eof(&mut buf) {
            Err(ReplayError::TruncatedStream(buffered)) => assert_eq!(buffered, raw.len() / 2),
            other => panic!("expected truncation error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_bogus_length_prefix() {
        let mut scanner = RecordScanner::new();

        let mut buf = BytesMut::from(&2i32.to_le_bytes()[..]);
        match scanner.decode(&mut buf) {
            Err(ReplayError::BadLengthPrefix(len)) => assert_eq!(len, 2),
            other => panic!("expected bad prefix error, got {:?}", other),
        }

        let mut buf = BytesMut::from(&(-5i32).to_le_bytes()[..]);
        assert!(matches!(
            scanner.decode(&mut buf),
            Err(ReplayError::BadLengthPrefix(-5))
        ));
    }
}
