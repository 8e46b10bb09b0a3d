// Outbound message queue
// Per-endpoint strictly-ordered FIFO of pending writes with completion
// notification. At most one write is in flight on the transport at a time;
// a write failure flushes the remainder of the queue with that same error
// instead of attempting to continue.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::driver::IoCommand;
use crate::transport::TransportError;

pub(crate) type WriteCompletion = oneshot::Sender<Result<(), TransportError>>;

enum QueueItem {
    Message {
        data: Vec<u8>,
        done: Option<WriteCompletion>,
    },
    /// Drop everything queued, completing callbacks with `Cancelled`.
    Clear,
}

/// Handle to an endpoint's outbound FIFO.
pub(crate) struct MessageQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl MessageQueue {
    /// Spawn the pump task feeding the given driver.
    pub(crate) fn start(io: mpsc::Sender<IoCommand>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(io, rx));
        Self { tx }
    }

    /// Append a message; strictly FIFO relative to other enqueues.
    pub(crate) fn enqueue(&self, data: Vec<u8>, done: Option<WriteCompletion>) {
        if let Err(mpsc::error::SendError(item)) =
            self.tx.send(QueueItem::Message { data, done })
        {
            if let QueueItem::Message { done: Some(done), .. } = item {
                let _ = done.send(Err(TransportError::Closed));
            }
        }
    }

    /// Drop all queued messages.
    pub(crate) fn clear(&self) {
        let _ = self.tx.send(QueueItem::Clear);
    }
}

async fn pump(io: mpsc::Sender<IoCommand>, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Clear => flush_pending(&mut rx, TransportError::Cancelled),
            QueueItem::Message { data, done } => {
                let (done_tx, done_rx) = oneshot::channel();
                let result = if io
                    .send(IoCommand::Write { data, done: done_tx })
                    .await
                    .is_ok()
                {
                    done_rx.await.unwrap_or(Err(TransportError::Closed))
                } else {
                    Err(TransportError::Closed)
                };
                match result {
                    Ok(()) => {
                        if let Some(done) = done {
                            let _ = done.send(Ok(()));
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "write failed, flushing outbound queue");
                        if let Some(done) = done {
                            let _ = done.send(Err(e.clone()));
                        }
                        flush_pending(&mut rx, e);
                    }
                }
            }
        }
    }
}

/// Complete everything currently queued with `error`, sending nothing.
fn flush_pending(rx: &mut mpsc::UnboundedReceiver<QueueItem>, error: TransportError) {
    while let Ok(item) = rx.try_recv() {
        if let QueueItem::Message { done: Some(done), .. } = item {
            let _ = done.send(Err(error.clone()));
        }
    }
}
