// src/replay.rs
//
// Pipeline orchestrator: parse -> pace -> batch -> apply, each stage its own
// task, wired with bounded channels. Data flows one way; a shared
// cancellation token flows the other so an apply failure unwinds every stage
// without leaving anything blocked on a channel nobody reads anymore.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::{BATCH_BUFFER_CAPACITY, BATCH_IDLE_BACKOFF, OP_BUFFER_CAPACITY};
use crate::error::ReplayError;
use crate::rate::RateController;
use crate::scanner::RecordScanner;
use crate::sink::{check_outcome, ApplySink};
use crate::types::Operation;

/// Replay an oplog stream into the sink, paced by the controller.
///
/// Returns on the first unrecoverable error. An apply failure outranks a
/// parse failure in the reported result: if the sink rejected an operation
/// and the parser also choked on trailing bytes, the caller hears about the
/// rejection. A parse error after every operation applied cleanly is still
/// surfaced. At-least-once-until-first-failure is the contract; nothing is
/// retried here.
pub async fn replay_oplog<R>(
    input: R,
    controller: Box<dyn RateController>,
    sink: Arc<dyn ApplySink>,
) -> Result<(), ReplayError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let cancel = CancellationToken::new();
    let (ops_tx, ops_rx) = mpsc::channel(OP_BUFFER_CAPACITY);
    let (paced_tx, paced_rx) = mpsc::channel(BATCH_BUFFER_CAPACITY);
    let (batches_tx, mut batches_rx) = mpsc::channel(1);

    info!("parsing oplog stream");
    let parse = parse_stage(input, ops_tx, cancel.clone());
    let pace = pace_stage(controller, ops_rx, paced_tx, cancel.clone());
    let batch = batch_stage(paced_rx, batches_tx, cancel.clone());

    info!("begin replaying");
    let mut batches_applied = 0usize;
    let mut ops_applied = 0usize;
    let mut apply_error = None;

    while let Some(batch) = batches_rx.recv().await {
        let result = match sink.apply(&batch).await {
            Ok(outcome) => check_outcome(&batch, &outcome),
            Err(err) => Err(ReplayError::Sink(err)),
        };
        if let Err(err) = result {
            apply_error = Some(err);
            break;
        }
        batches_applied += 1;
        ops_applied += batch.len();
        debug!("applied batch of {} operations", batch.len());
    }

    if apply_error.is_some() {
        cancel.cancel();
    }

    // Join every stage before reporting, so nothing outlives the replay. An
    // apply failure takes precedence over whatever the parser saw afterwards.
    let parse_result = parse.await;
    let pace_result = pace.await;
    let batch_result = batch.await;

    if let Some(err) = apply_error {
        return Err(err);
    }
    pace_result?;
    batch_result?;
    parse_result??;

    info!(
        "replay complete: {} operations applied in {} batches",
        ops_applied, batches_applied
    );
    Ok(())
}

/// Parse stage: frame and decode the input stream, emitting operations in
/// stream order. Ends with the first stream or decode error, or cleanly at
/// EOF.
fn parse_stage<R>(
    input: R,
    ops: Sender<Operation>,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), ReplayError>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(input, RecordScanner::new());
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = frames.next() => match frame {
                    Some(frame) => frame?,
                    None => return Ok(()),
                },
            };
            let op = Operation::from_slice(&frame)?;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = ops.send(op) => {
                    // Receiver gone means the pipeline is shutting down.
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    })
}

/// Pace stage: drop no-ops, ask the controller how long to hold each real
/// operation, sleep that long, forward. Owns the controller's mutable state
/// outright.
fn pace_stage(
    mut controller: Box<dyn RateController>,
    mut ops: Receiver<Operation>,
    paced: Sender<Operation>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(op) = ops.recv().await {
            if op.is_noop() {
                debug!("skipping entry with no namespace at {}", op.ts.time);
                continue;
            }
            let wait = controller.wait_time(&op);
            if !wait.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(wait) => {}
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = paced.send(op) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// Batch stage: drain whatever is immediately available, up to the paced
/// buffer's capacity, and hand it downstream as one batch. When nothing has
/// accumulated, back off briefly instead of spinning. Flushes the partial
/// batch on upstream completion.
fn batch_stage(
    mut paced: Receiver<Operation>,
    batches: Sender<Vec<Operation>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<Operation> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match paced.try_recv() {
                Ok(op) => {
                    pending.push(op);
                    if pending.len() >= BATCH_BUFFER_CAPACITY
                        && !flush(&mut pending, &batches, &cancel).await
                    {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => {
                    if pending.is_empty() {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = sleep(BATCH_IDLE_BACKOFF) => {}
                        }
                    } else if !flush(&mut pending, &batches, &cancel).await {
                        return;
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    flush(&mut pending, &batches, &cancel).await;
                    return;
                }
            }
        }
    })
}

/// Send the accumulated batch downstream, if there is one. Returns false
/// when the pipeline is shutting down and the stage should unwind.
async fn flush(
    pending: &mut Vec<Operation>,
    batches: &Sender<Vec<Operation>>,
    cancel: &CancellationToken,
) -> bool {
    if pending.is_empty() {
        return true;
    }
    let batch = std::mem::take(pending);
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = batches.send(batch) => sent.is_ok(),
    }
}
