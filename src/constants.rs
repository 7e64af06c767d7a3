// src/constants.rs
//
// Centralized constants for the replay pipeline to avoid hardcoded values
// throughout the codebase.

use std::time::Duration;

/// Bytes in the little-endian length prefix that opens every BSON document.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Capacity of the channel between the pace and batch stages. The batch
/// stage drains whatever is immediately available, so this is also the
/// maximum batch size handed to the apply sink. The choice of 20 is fairly
/// arbitrary.
pub const BATCH_BUFFER_CAPACITY: usize = 20;

/// Capacity of the channel between the parse and pace stages. Pacing is the
/// slow side; there is nothing to gain from decoding far ahead of it.
pub const OP_BUFFER_CAPACITY: usize = 1;

/// How long the batch stage idles when no operations are ready, to stop it
/// from busy-waiting a core away.
pub const BATCH_IDLE_BACKOFF: Duration = Duration::from_millis(1);
