// Protocol module - wire framing, typed values, definition tables

mod codec;
mod defs;
mod value;

use thiserror::Error;

pub use codec::{
    // Decoder and message model
    FrameDecoder, WireMessage,
    // Encoders
    encode_event, encode_ping, encode_reboot,
    // Wire constants
    HOST_SOURCE, KIND_HANDSHAKE, KIND_PING, KIND_REBOOT, MAX_PAYLOAD_LEN,
};

pub use defs::{EventDef, NamedConstant, ProtocolDefs};

pub use value::PropertyValue;

/// Local, recoverable protocol errors.
///
/// Reported to the caller; they never tear down the endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("No such variable or event")]
    NoSuchVariable,

    #[error("Value not representable as a 16-bit signed integer")]
    IncompatibleVariableType,

    #[error("Malformed payload")]
    MalformedPayload,
}
