// Transport module - THE WIRE (abstract)
// Uniform handle over TCP, USB and serial robot connections, plus the
// acceptor interface used to discover and reclaim them.

mod acceptor;
mod handle;

pub use acceptor::{Acceptor, AcceptorRegistry};

pub use handle::{
    // Handle sum type and its variants' raw halves
    TransportHandle,
    DeviceChannel, DevicePeer, ControlRequest,
    // Identity and release
    TransportKind, ReleaseToken,
    // Errors
    TransportError,
};
