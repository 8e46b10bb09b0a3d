// Transport driver task - the endpoint's serialized I/O context
// One driver task per endpoint owns the transport handle. Commands and the
// next inbound read are multiplexed in a single loop, so writes, lockstep
// exchanges and control-line changes never interleave with each other or
// with a read on the same handle.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

use crate::transport::{TransportError, TransportHandle};

/// How long a configuration-mode lockstep exchange may wait for the
/// dongle's reply.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands accepted by the driver task.
pub(crate) enum IoCommand {
    /// Write one message; completion carries the transport result.
    Write {
        data: Vec<u8>,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Lockstep write-then-read, used by the dongle configuration
    /// exchange while the read loop is paused.
    Exchange {
        data: Vec<u8>,
        done: oneshot::Sender<Result<Vec<u8>, TransportError>>,
    },
    /// Toggle the dongle configuration control lines.
    SetConfigLines {
        enable: bool,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Discard inbound bytes buffered ahead of a lockstep exchange, so
    /// stale robot traffic cannot be mistaken for the dongle's reply.
    Purge,
    /// Stop feeding inbound bytes (configuration mode).
    PauseReads,
    /// Resume feeding inbound bytes.
    ResumeReads,
    /// Abort in-flight I/O; the pending read future is dropped.
    Cancel,
    /// Transport-specific quiesce.
    Stop,
    /// Close the handle and end the driver.
    Close,
}

enum DriverEvent {
    Command(Option<IoCommand>),
    Inbound(Result<Vec<u8>, TransportError>),
}

/// Spawn the driver task for `handle`.
///
/// Returns the command channel and the inbound byte stream. The inbound
/// channel closing signals the end of the transport session.
pub(crate) fn spawn_driver(
    handle: TransportHandle,
) -> (mpsc::Sender<IoCommand>, mpsc::Receiver<Vec<u8>>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    tokio::spawn(run_driver(handle, cmd_rx, inbound_tx));
    (cmd_tx, inbound_rx)
}

async fn run_driver(
    mut handle: TransportHandle,
    mut cmd_rx: mpsc::Receiver<IoCommand>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
) {
    let kind = handle.kind();
    let mut reads_enabled = true;
    loop {
        // The read future borrows the handle, so command bodies run after
        // the select has resolved and the borrow is gone.
        let event = if reads_enabled {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => DriverEvent::Command(cmd),
                res = handle.read_some() => DriverEvent::Inbound(res),
            }
        } else {
            DriverEvent::Command(cmd_rx.recv().await)
        };

        match event {
            // All command senders gone: the endpoint has been destroyed.
            DriverEvent::Command(None) => break,
            DriverEvent::Command(Some(cmd)) => match cmd {
                IoCommand::Write { data, done } => {
                    let _ = done.send(handle.write_all(&data).await);
                }
                IoCommand::Exchange { data, done } => {
                    let _ = done.send(exchange(&mut handle, &data).await);
                }
                IoCommand::SetConfigLines { enable, done } => {
                    let _ = done.send(handle.set_config_lines(enable));
                }
                IoCommand::Purge => {
                    let _ = handle.purge();
                }
                IoCommand::PauseReads => reads_enabled = false,
                IoCommand::ResumeReads => reads_enabled = true,
                IoCommand::Cancel => handle.cancel(),
                IoCommand::Stop => handle.stop(),
                IoCommand::Close => {
                    handle.close();
                    break;
                }
            },
            DriverEvent::Inbound(Ok(chunk)) => {
                trace!(%kind, len = chunk.len(), "inbound chunk");
                if inbound_tx.send(chunk).await.is_err() {
                    break;
                }
            }
            DriverEvent::Inbound(Err(e)) => {
                debug!(%kind, error = %e, "transport read failed, ending session");
                break;
            }
        }
    }
    // Dropping inbound_tx here closes the read loop's channel.
}

async fn exchange(
    handle: &mut TransportHandle,
    data: &[u8],
) -> Result<Vec<u8>, TransportError> {
    handle.write_all(data).await?;
    timeout(EXCHANGE_TIMEOUT, handle.read_some())
        .await
        .map_err(|_| TransportError::Timeout)?
}
