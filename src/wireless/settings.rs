// Wireless dongle settings record
// Fixed-size binary record exchanged with a dongle held in configuration
// mode: control flags, network (pan) id, node id, channel. The channel
// byte carries the radio encoding `15 + 5 * channel`.

use serde::{Deserialize, Serialize};

/// Size of the settings record on the wire.
pub const SETTINGS_RECORD_LEN: usize = 6;

/// Control-byte bit requesting the dongle flash the record to persistent
/// storage and apply it.
pub const CTRL_FLASH: u8 = 0x01;

const CHANNEL_BASE: u8 = 15;
const CHANNEL_STEP: u8 = 5;

/// Encode a logical channel number into its radio representation.
pub fn encode_channel(channel: u8) -> u8 {
    CHANNEL_BASE + CHANNEL_STEP * channel
}

/// Decode a radio channel byte back to the logical channel number.
pub fn decode_channel(wire: u8) -> u8 {
    wire.saturating_sub(CHANNEL_BASE) / CHANNEL_STEP
}

/// The raw settings record, as written to and read from the dongle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DongleSettings {
    pub ctrl: u8,
    pub pan_id: u16,
    pub node_id: u16,
    pub channel: u8,
}

impl DongleSettings {
    pub fn to_bytes(&self) -> [u8; SETTINGS_RECORD_LEN] {
        let pan = self.pan_id.to_le_bytes();
        let node = self.node_id.to_le_bytes();
        [self.ctrl, pan[0], pan[1], node[0], node[1], self.channel]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SETTINGS_RECORD_LEN {
            return None;
        }
        Some(Self {
            ctrl: bytes[0],
            pan_id: u16::from_le_bytes([bytes[1], bytes[2]]),
            node_id: u16::from_le_bytes([bytes[3], bytes[4]]),
            channel: bytes[5],
        })
    }
}

/// Decoded, client-facing view of the dongle settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessSettings {
    pub network_id: u16,
    pub dongle_id: u16,
    /// Logical channel number (decoded from the radio representation).
    pub channel: u8,
}

impl From<DongleSettings> for WirelessSettings {
    fn from(raw: DongleSettings) -> Self {
        Self {
            network_id: raw.pan_id,
            dongle_id: raw.node_id,
            channel: decode_channel(raw.channel),
        }
    }
}
