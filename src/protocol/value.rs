// Typed property values exchanged with robot nodes
// Values cross the wire as sequences of little-endian signed 16-bit words;
// encoding is validated against the payload length the definition table
// records for the target event.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// A typed value attached to an event or shared variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Integer(i64),
    Array(Vec<i64>),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    /// Number of wire words this value occupies.
    pub fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Integer(_) => 1,
            Self::Array(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Narrow to the wire word type, rejecting out-of-range values.
    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::Integer(v) => i16::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Encode for the wire, validated against the expected word count.
    ///
    /// A mismatch in length or a value outside the i16 range yields
    /// `IncompatibleVariableType`; callers abort the whole batch being
    /// encoded so nothing partial is ever queued.
    pub fn to_wire(&self, expected_words: usize) -> Result<Vec<u8>, ProtocolError> {
        let words: Vec<i16> = match self {
            Self::Null if expected_words == 0 => Vec::new(),
            Self::Null => return Err(ProtocolError::IncompatibleVariableType),
            Self::Integer(v) => {
                if expected_words != 1 {
                    return Err(ProtocolError::IncompatibleVariableType);
                }
                vec![i16::try_from(*v).map_err(|_| ProtocolError::IncompatibleVariableType)?]
            }
            Self::Array(values) => {
                if values.len() != expected_words {
                    return Err(ProtocolError::IncompatibleVariableType);
                }
                values
                    .iter()
                    .map(|v| i16::try_from(*v).map_err(|_| ProtocolError::IncompatibleVariableType))
                    .collect::<Result<_, _>>()?
            }
        };
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        Ok(bytes)
    }

    /// Decode an inbound payload.
    ///
    /// Single-word payloads decode as `Integer`, everything else as
    /// `Array`. An odd byte count is malformed.
    pub fn from_wire(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() % 2 != 0 {
            return Err(ProtocolError::MalformedPayload);
        }
        let words: Vec<i64> = payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as i64)
            .collect();
        Ok(match words.len() {
            0 => Self::Null,
            1 => Self::Integer(words[0]),
            _ => Self::Array(words),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let bytes = PropertyValue::Integer(-42).to_wire(1).unwrap();
        assert_eq!(PropertyValue::from_wire(&bytes).unwrap(), PropertyValue::Integer(-42));
    }

    #[test]
    fn test_array_roundtrip() {
        let value = PropertyValue::Array(vec![1, -2, 300]);
        let bytes = value.to_wire(3).unwrap();
        assert_eq!(PropertyValue::from_wire(&bytes).unwrap(), value);
    }

    #[test]
    fn test_integer_wrong_expected_len() {
        assert_eq!(
            PropertyValue::Integer(7).to_wire(2),
            Err(ProtocolError::IncompatibleVariableType)
        );
    }

    #[test]
    fn test_integer_out_of_range() {
        assert_eq!(
            PropertyValue::Integer(40_000).to_wire(1),
            Err(ProtocolError::IncompatibleVariableType)
        );
    }

    #[test]
    fn test_array_length_mismatch() {
        assert_eq!(
            PropertyValue::Array(vec![1, 2]).to_wire(3),
            Err(ProtocolError::IncompatibleVariableType)
        );
    }

    #[test]
    fn test_null_requires_zero_words() {
        assert_eq!(PropertyValue::Null.to_wire(0).unwrap(), Vec::<u8>::new());
        assert_eq!(
            PropertyValue::Null.to_wire(1),
            Err(ProtocolError::IncompatibleVariableType)
        );
    }

    #[test]
    fn test_odd_payload_is_malformed() {
        assert_eq!(
            PropertyValue::from_wire(&[0x01]),
            Err(ProtocolError::MalformedPayload)
        );
    }
}
