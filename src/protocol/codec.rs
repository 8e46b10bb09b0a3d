// Wire codec - message framing for the robot protocol
// Frame layout, little-endian throughout:
//   u16 payload_len | u16 source | u16 kind | payload
// Kinds below 0x8000 are event ids assigned by the definition table;
// management kinds live above.

use tracing::warn;

/// Management message kinds.
pub const KIND_HANDSHAKE: u16 = 0x8000;
pub const KIND_PING: u16 = 0x8001;
pub const KIND_REBOOT: u16 = 0x8002;

/// Source id used for host-originated messages.
pub const HOST_SOURCE: u16 = 0;

/// Frames longer than this are treated as stream corruption.
pub const MAX_PAYLOAD_LEN: usize = 512;

const HEADER_LEN: usize = 6;

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A user event: kind is the event id from the definition table.
    Event {
        source: u16,
        event_id: u16,
        payload: Vec<u8>,
    },
    /// Node announcement; creates or refreshes the node for `source`.
    Handshake { source: u16 },
    /// Liveness probe / node-list request.
    Ping,
    /// Reboot command for the node with the given native id.
    Reboot { target: u16 },
    /// A management kind this build does not understand.
    Unknown { source: u16, kind: u16 },
}

/// Encode an outbound event message.
pub fn encode_event(event_id: u16, payload: &[u8]) -> Vec<u8> {
    encode_frame(HOST_SOURCE, event_id, payload)
}

/// Encode a liveness probe.
pub fn encode_ping() -> Vec<u8> {
    encode_frame(HOST_SOURCE, KIND_PING, &[])
}

/// Encode a reboot command for `target`.
pub fn encode_reboot(target: u16) -> Vec<u8> {
    encode_frame(HOST_SOURCE, KIND_REBOOT, &target.to_le_bytes())
}

fn encode_frame(source: u16, kind: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&source.to_le_bytes());
    frame.extend_from_slice(&kind.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental frame reassembly over arbitrary read chunks.
///
/// Inbound bytes may arrive split or coalesced; the decoder buffers until a
/// complete frame is available. A frame announcing an implausible payload
/// length is treated as stream corruption: the buffer is dropped and
/// decoding resumes with the next chunk. Decode failures never terminate
/// the session.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of inbound bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete message, if any.
    pub fn next_message(&mut self) -> Option<WireMessage> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let payload_len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
            if payload_len > MAX_PAYLOAD_LEN {
                warn!(payload_len, "implausible frame length, dropping buffer");
                self.buf.clear();
                return None;
            }
            if self.buf.len() < HEADER_LEN + payload_len {
                return None;
            }
            let source = u16::from_le_bytes([self.buf[2], self.buf[3]]);
            let kind = u16::from_le_bytes([self.buf[4], self.buf[5]]);
            let payload: Vec<u8> = self.buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
            self.buf.drain(..HEADER_LEN + payload_len);

            match Self::classify(source, kind, payload) {
                Some(msg) => return Some(msg),
                // Malformed management payload: skip it, keep decoding.
                None => continue,
            }
        }
    }

    fn classify(source: u16, kind: u16, payload: Vec<u8>) -> Option<WireMessage> {
        if kind < KIND_HANDSHAKE {
            return Some(WireMessage::Event {
                source,
                event_id: kind,
                payload,
            });
        }
        match kind {
            KIND_HANDSHAKE => Some(WireMessage::Handshake { source }),
            KIND_PING => Some(WireMessage::Ping),
            KIND_REBOOT => {
                if payload.len() != 2 {
                    warn!(source, "reboot frame with malformed payload, skipping");
                    return None;
                }
                Some(WireMessage::Reboot {
                    target: u16::from_le_bytes([payload[0], payload[1]]),
                })
            }
            _ => Some(WireMessage::Unknown { source, kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip() {
        let frame = encode_event(3, &[0x0a, 0x00]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        assert_eq!(
            decoder.next_message(),
            Some(WireMessage::Event {
                source: HOST_SOURCE,
                event_id: 3,
                payload: vec![0x0a, 0x00],
            })
        );
        assert_eq!(decoder.next_message(), None);
    }

    #[test]
    fn test_split_frame_reassembly() {
        let frame = encode_event(1, &[1, 0, 2, 0, 3, 0]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..4]);
        assert_eq!(decoder.next_message(), None);
        decoder.push(&frame[4..]);
        assert!(matches!(
            decoder.next_message(),
            Some(WireMessage::Event { event_id: 1, .. })
        ));
    }

    #[test]
    fn test_coalesced_frames() {
        let mut bytes = encode_ping();
        bytes.extend_from_slice(&encode_reboot(7));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_message(), Some(WireMessage::Ping));
        assert_eq!(decoder.next_message(), Some(WireMessage::Reboot { target: 7 }));
        assert_eq!(decoder.next_message(), None);
    }

    #[test]
    fn test_handshake_classification() {
        let frame = encode_frame(42, KIND_HANDSHAKE, &[]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        assert_eq!(decoder.next_message(), Some(WireMessage::Handshake { source: 42 }));
    }

    #[test]
    fn test_implausible_length_drops_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0xff, 0xff, 0, 0, 0, 0]);
        assert_eq!(decoder.next_message(), None);
        // Decoder recovers with the next well-formed frame.
        decoder.push(&encode_ping());
        assert_eq!(decoder.next_message(), Some(WireMessage::Ping));
    }

    #[test]
    fn test_malformed_reboot_is_skipped() {
        let mut bytes = encode_frame(1, KIND_REBOOT, &[9]);
        bytes.extend_from_slice(&encode_ping());
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        // Bad reboot frame skipped, ping still decoded.
        assert_eq!(decoder.next_message(), Some(WireMessage::Ping));
    }

    #[test]
    fn test_unknown_management_kind() {
        let frame = encode_frame(5, 0x9abc, &[]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        assert_eq!(
            decoder.next_message(),
            Some(WireMessage::Unknown { source: 5, kind: 0x9abc })
        );
    }
}
