//! Handshake record sent once per connection

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::tuner::TunerType;

pub const DONGLE_INFO_SIZE: usize = 12;
pub const DONGLE_MAGIC: [u8; 4] = *b"RTL0";

/// Tuner description sent by the server right after accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DongleInfo {
    pub magic: [u8; 4],
    pub tuner_type: TunerType,
    pub gain_count: u32,
}

impl DongleInfo {
    pub fn new(tuner_type: TunerType, gain_count: u32) -> Self {
        Self {
            magic: DONGLE_MAGIC,
            tuner_type,
            gain_count,
        }
    }

    /// Same record with the magic reset to `RTL0`
    pub fn with_forced_magic(mut self) -> Self {
        self.magic = DONGLE_MAGIC;
        self
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == DONGLE_MAGIC
    }

    pub fn encode(&self) -> [u8; DONGLE_INFO_SIZE] {
        let mut out = [0u8; DONGLE_INFO_SIZE];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.tuner_type.code().to_be_bytes());
        out[8..12].copy_from_slice(&self.gain_count.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DONGLE_INFO_SIZE {
            return Err(ProtocolError::DongleInfoLength {
                expected: DONGLE_INFO_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            tuner_type: TunerType::from_code(u32::from_be_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            gain_count: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

impl Default for DongleInfo {
    fn default() -> Self {
        Self::new(TunerType::R820t, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let info = DongleInfo::new(TunerType::R820t, 32);
        assert_eq!(
            info.encode(),
            [b'R', b'T', b'L', b'0', 0, 0, 0, 5, 0, 0, 0, 32]
        );
    }

    #[test]
    fn test_forced_magic() {
        let info = DongleInfo {
            magic: *b"XXXX",
            tuner_type: TunerType::E4000,
            gain_count: 14,
        };
        assert!(!info.has_valid_magic());

        let bytes = info.with_forced_magic().encode();
        assert_eq!(&bytes[..4], b"RTL0");
        assert_eq!(bytes.len(), DONGLE_INFO_SIZE);
    }

    #[test]
    fn test_decode() {
        let info = DongleInfo::decode(&[b'R', b'T', b'L', b'0', 0, 0, 0, 6, 0, 0, 1, 0]).unwrap();
        assert_eq!(info.tuner_type, TunerType::R828d);
        assert_eq!(info.gain_count, 256);
        assert!(info.has_valid_magic());
    }

    #[test]
    fn test_short_handshake_rejected() {
        assert_eq!(
            DongleInfo::decode(b"RTL0"),
            Err(ProtocolError::DongleInfoLength { expected: 12, actual: 4 })
        );
    }
}
