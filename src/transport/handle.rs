// Transport Handle - the raw resource behind an endpoint
// A closed set of variants (TCP socket, USB device, serial port) exposing a
// common operation set: read, write, cancel, stop, close, release-to-pool.

use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Read buffer size for socket reads.
const READ_CHUNK_SIZE: usize = 4096;

/// Errors surfaced by transport operations.
///
/// Clonable so a single write failure can be fanned out to every
/// queued completion callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transport closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation not supported on {0} transport")]
    Unsupported(&'static str),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// The kind of transport behind an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransportKind {
    Tcp,
    Usb,
    Serial,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Usb => write!(f, "usb"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// Control-line requests understood by the acceptor-side device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    SetRts(bool),
    SetDtr(bool),
    Purge,
    Cancel,
    Close,
}

/// Raw duplex handle to a USB or serial device.
///
/// The acceptor that discovered the device owns the OS-level I/O and hands
/// the core this channel pair. Outbound bytes go through `tx`, inbound
/// chunks arrive on `rx`, and electrical control-line changes (RTS/DTR,
/// purge) are forwarded through `ctrl`.
pub struct DeviceChannel {
    path: String,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    ctrl: mpsc::UnboundedSender<ControlRequest>,
}

/// The acceptor-facing side of a [`DeviceChannel`].
///
/// Production acceptors drive the real device from this half; tests use it
/// to script device behaviour.
pub struct DevicePeer {
    /// Bytes the core wrote to the device.
    pub written_rx: mpsc::Receiver<Vec<u8>>,
    /// Feed bytes "from the device" into the core.
    pub inbound_tx: mpsc::Sender<Vec<u8>>,
    /// Control-line requests issued by the core.
    pub ctrl_rx: mpsc::UnboundedReceiver<ControlRequest>,
}

impl DeviceChannel {
    /// Create a connected channel pair for the device at `path`.
    pub fn pair(path: &str) -> (Self, DevicePeer) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_string(),
                tx: out_tx,
                rx: in_rx,
                ctrl: ctrl_tx,
            },
            DevicePeer {
                written_rx: out_rx,
                inbound_tx: in_tx,
                ctrl_rx,
            },
        )
    }

    /// Device path as reported by the acceptor.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn control(&self, req: ControlRequest) -> Result<(), TransportError> {
        self.ctrl.send(req).map_err(|_| TransportError::Closed)
    }
}

/// Identifies a released transport back to its owning acceptor.
///
/// Plain data only: a release may be posted from a timer or callback whose
/// endpoint no longer exists, so it must never carry a reference into
/// endpoint state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseToken {
    pub kind: TransportKind,
    /// Device path for USB/serial, peer address for TCP.
    pub target: String,
}

impl fmt::Display for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.target)
    }
}

/// The underlying TCP/USB/serial resource, exactly one variant active.
///
/// Once its [`ReleaseToken`] has been handed back to the acceptor no
/// further I/O may be issued on the handle.
pub enum TransportHandle {
    Tcp(TcpStream),
    Usb(DeviceChannel),
    Serial(DeviceChannel),
}

impl TransportHandle {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Usb(_) => TransportKind::Usb,
            Self::Serial(_) => TransportKind::Serial,
        }
    }

    /// Token used to hand this handle back to its acceptor.
    pub fn release_token(&self) -> ReleaseToken {
        match self {
            Self::Tcp(stream) => ReleaseToken {
                kind: TransportKind::Tcp,
                target: stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
            },
            Self::Usb(dev) => ReleaseToken {
                kind: TransportKind::Usb,
                target: dev.path().to_string(),
            },
            Self::Serial(dev) => ReleaseToken {
                kind: TransportKind::Serial,
                target: dev.path().to_string(),
            },
        }
    }

    /// Await the next chunk of inbound bytes.
    ///
    /// At most one read may be outstanding at a time; the caller (the
    /// endpoint's transport driver) guarantees this. Cancel safe.
    pub async fn read_some(&mut self) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::Tcp(stream) => {
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                buf.truncate(n);
                Ok(buf)
            }
            Self::Usb(dev) | Self::Serial(dev) => {
                dev.rx.recv().await.ok_or(TransportError::Closed)
            }
        }
    }

    /// Write the whole buffer to the transport.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Tcp(stream) => {
                stream.write_all(data).await?;
                Ok(())
            }
            Self::Usb(dev) | Self::Serial(dev) => dev
                .tx
                .send(data.to_vec())
                .await
                .map_err(|_| TransportError::Closed),
        }
    }

    /// Abort in-flight I/O. Never blocks.
    ///
    /// The driver loop drops its pending read future when it processes the
    /// cancel command; for devices we additionally tell the acceptor driver
    /// to abort anything it has in flight.
    pub fn cancel(&self) {
        match self {
            Self::Tcp(_) => trace!("cancel: tcp pending ops dropped by driver"),
            Self::Usb(dev) | Self::Serial(dev) => {
                let _ = dev.control(ControlRequest::Cancel);
            }
        }
    }

    /// Transport-specific quiesce. No-op for connection-oriented sockets.
    pub fn stop(&self) {
        match self {
            Self::Tcp(_) => {}
            Self::Usb(dev) | Self::Serial(dev) => {
                let _ = dev.control(ControlRequest::Cancel);
            }
        }
    }

    /// Transport-specific handle close.
    ///
    /// A no-op for sockets, which are torn down when the handle is
    /// released back to the acceptor pool.
    pub fn close(&mut self) {
        match self {
            Self::Tcp(_) => {}
            Self::Usb(dev) | Self::Serial(dev) => {
                let _ = dev.control(ControlRequest::Close);
            }
        }
    }

    /// Discard buffered inbound bytes: chunks already forwarded by the
    /// acceptor are drained here, and the acceptor is told to empty the
    /// OS-side buffer as well. Unsupported on TCP.
    pub fn purge(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Tcp(_) => Err(TransportError::Unsupported("tcp")),
            Self::Usb(dev) | Self::Serial(dev) => {
                while dev.rx.try_recv().is_ok() {}
                dev.control(ControlRequest::Purge)
            }
        }
    }

    /// Toggle the dongle configuration-mode control lines.
    ///
    /// Entering configuration mode raises RTS and drops DTR; leaving
    /// restores them. Unsupported on TCP.
    pub fn set_config_lines(&self, enable: bool) -> Result<(), TransportError> {
        match self {
            Self::Tcp(_) => Err(TransportError::Unsupported("tcp")),
            Self::Usb(dev) => {
                dev.control(ControlRequest::Cancel)?;
                dev.control(ControlRequest::SetRts(enable))?;
                dev.control(ControlRequest::SetDtr(!enable))?;
                Ok(())
            }
            Self::Serial(dev) => {
                dev.control(ControlRequest::Purge)?;
                dev.control(ControlRequest::SetRts(enable))?;
                dev.control(ControlRequest::SetDtr(!enable))?;
                Ok(())
            }
        }
    }

    pub fn is_device(&self) -> bool {
        !matches!(self, Self::Tcp(_))
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(_) => write!(f, "TransportHandle::Tcp"),
            Self::Usb(dev) => write!(f, "TransportHandle::Usb({})", dev.path()),
            Self::Serial(dev) => write!(f, "TransportHandle::Serial({})", dev.path()),
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        debug!(kind = %self.kind(), "dropping transport handle");
    }
}
