//! Client to server control frames

use std::fmt;

use crate::error::{ProtocolError, Result};

/// Size of one command frame on the wire
pub const COMMAND_SIZE: usize = 5;

/// Command opcode
///
/// Every byte value is representable. Bytes outside the known table decode
/// to [`CommandType::Unknown`] so old and odd clients are never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    SetFrequency,
    SetSampleRate,
    SetGainMode,
    SetGain,
    SetFrequencyCorrection,
    SetIfStage,
    SetTestMode,
    SetAgcMode,
    SetDirectSampling,
    SetOffsetTuning,
    SetRtlCrystal,
    SetTunerCrystal,
    SetTunerGainByIndex,
    SetTunerBandwidth,
    SetBiasTee,
    Invalid,
    Unknown(u8),
}

impl From<u8> for CommandType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::SetFrequency,
            0x02 => Self::SetSampleRate,
            0x03 => Self::SetGainMode,
            0x04 => Self::SetGain,
            0x05 => Self::SetFrequencyCorrection,
            0x06 => Self::SetIfStage,
            0x07 => Self::SetTestMode,
            0x08 => Self::SetAgcMode,
            0x09 => Self::SetDirectSampling,
            0x0A => Self::SetOffsetTuning,
            0x0B => Self::SetRtlCrystal,
            0x0C => Self::SetTunerCrystal,
            0x0D => Self::SetTunerGainByIndex,
            0x0E => Self::SetTunerBandwidth,
            0x0F => Self::SetBiasTee,
            0xFF => Self::Invalid,
            other => Self::Unknown(other),
        }
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        match value {
            CommandType::SetFrequency => 0x01,
            CommandType::SetSampleRate => 0x02,
            CommandType::SetGainMode => 0x03,
            CommandType::SetGain => 0x04,
            CommandType::SetFrequencyCorrection => 0x05,
            CommandType::SetIfStage => 0x06,
            CommandType::SetTestMode => 0x07,
            CommandType::SetAgcMode => 0x08,
            CommandType::SetDirectSampling => 0x09,
            CommandType::SetOffsetTuning => 0x0A,
            CommandType::SetRtlCrystal => 0x0B,
            CommandType::SetTunerCrystal => 0x0C,
            CommandType::SetTunerGainByIndex => 0x0D,
            CommandType::SetTunerBandwidth => 0x0E,
            CommandType::SetBiasTee => 0x0F,
            CommandType::Invalid => 0xFF,
            CommandType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SetFrequency => "SetFrequency",
            Self::SetSampleRate => "SetSampleRate",
            Self::SetGainMode => "SetGainMode",
            Self::SetGain => "SetGain",
            Self::SetFrequencyCorrection => "SetFrequencyCorrection",
            Self::SetIfStage => "SetIfStage",
            Self::SetTestMode => "SetTestMode",
            Self::SetAgcMode => "SetAgcMode",
            Self::SetDirectSampling => "SetDirectSampling",
            Self::SetOffsetTuning => "SetOffsetTuning",
            Self::SetRtlCrystal => "SetRtlCrystal",
            Self::SetTunerCrystal => "SetTunerCrystal",
            Self::SetTunerGainByIndex => "SetTunerGainByIndex",
            Self::SetTunerBandwidth => "SetTunerBandwidth",
            Self::SetBiasTee => "SetBiasTee",
            Self::Invalid => "Invalid",
            Self::Unknown(code) => return write!(f, "Unknown(0x{:02X})", code),
        };
        f.write_str(name)
    }
}

/// A single 5 byte control frame
///
/// The meaning of `param` depends on the opcode (Hz for frequency and sample
/// rate, tenths of a dB for gain, a table index for gain-by-index, ...). This
/// crate does not interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub command_type: CommandType,
    pub param: u32,
}

impl Command {
    pub fn new(command_type: CommandType, param: u32) -> Self {
        Self { command_type, param }
    }

    pub fn set_frequency(hz: u32) -> Self {
        Self::new(CommandType::SetFrequency, hz)
    }

    pub fn set_sample_rate(hz: u32) -> Self {
        Self::new(CommandType::SetSampleRate, hz)
    }

    /// `manual == false` selects automatic gain
    pub fn set_gain_mode(manual: bool) -> Self {
        Self::new(CommandType::SetGainMode, manual as u32)
    }

    pub fn set_gain(tenths_db: u32) -> Self {
        Self::new(CommandType::SetGain, tenths_db)
    }

    pub fn set_agc_mode(enabled: bool) -> Self {
        Self::new(CommandType::SetAgcMode, enabled as u32)
    }

    pub fn set_tuner_gain_by_index(index: u32) -> Self {
        Self::new(CommandType::SetTunerGainByIndex, index)
    }

    pub fn set_bias_tee(enabled: bool) -> Self {
        Self::new(CommandType::SetBiasTee, enabled as u32)
    }

    /// Serialize to the wire layout: opcode, then the parameter big-endian
    pub fn encode(&self) -> [u8; COMMAND_SIZE] {
        let p = self.param.to_be_bytes();
        [self.command_type.into(), p[0], p[1], p[2], p[3]]
    }

    /// Parse exactly one frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame: &[u8; COMMAND_SIZE] =
            bytes.try_into().map_err(|_| ProtocolError::FrameLength {
                expected: COMMAND_SIZE,
                actual: bytes.len(),
            })?;

        Ok(Self {
            command_type: CommandType::from(frame[0]),
            param: u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:02X}) param={}",
            self.command_type,
            u8::from(self.command_type),
            self.param
        )
    }
}
