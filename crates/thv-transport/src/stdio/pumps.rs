//! Tasks moving bytes between the backend's standard streams and sessions.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thv_core::{MAX_FRAME_BYTES, WorkloadOutput, WorkloadStdin};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sessions::SessionRegistry;
use crate::codec::{Frame, JsonLineCodec};

/// Frames accepted from clients but not yet written to the backend.
pub(crate) const STDIN_QUEUE_CAPACITY: usize = 256;

/// Write queued client frames to the backend's stdin, one line each, in order.
pub(crate) async fn stdin_pump(
    stdin: WorkloadStdin,
    mut queue: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    let mut sink = FramedWrite::new(stdin, JsonLineCodec::new());
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "Failed to write to backend stdin");
            break;
        }
    }
    debug!("Stdin pump finished");
}

/// Decode the backend's stdout and route every frame to sessions.
///
/// A session that reads slowly holds the pump back rather than losing
/// frames. Bad lines are logged and skipped. At end of stream all sessions are
/// closed, which flushes whatever they still have queued.
pub(crate) async fn stdout_pump(stdout: WorkloadOutput, registry: Arc<SessionRegistry>) {
    let mut frames = FramedRead::new(stdout, JsonLineCodec::new());
    let mut routed: u64 = 0;
    while let Some(item) = frames.next().await {
        match item {
            Ok(Ok(frame)) => {
                routed += 1;
                registry.route(frame).await;
            }
            Ok(Err(e)) => warn!(error = %e, "Skipping backend output"),
            Err(e) => {
                warn!(error = %e, "Failed to read backend stdout");
                break;
            }
        }
    }
    debug!(routed, "Backend stdout closed");
    registry.close_all();
}

/// Forward backend stderr to the log, line by line.
pub(crate) async fn stderr_drain(stderr: WorkloadOutput, verbose: bool) {
    let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) if verbose => info!(target: "thv::backend", "{line}"),
            Ok(line) => debug!(target: "thv::backend", "{line}"),
            Err(e) => {
                debug!(error = %e, "Stopped reading backend stderr");
                break;
            }
        }
    }
}
