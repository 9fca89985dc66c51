use serde::{Deserialize, Serialize};
use std::fmt;

/// Tuner chip reported in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunerType {
    #[default]
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820t,
    R828d,
}

impl TunerType {
    /// Map a wire code to a tuner. Codes outside the table read as `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::E4000,
            2 => Self::Fc0012,
            3 => Self::Fc0013,
            4 => Self::Fc2580,
            5 => Self::R820t,
            6 => Self::R828d,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::E4000 => 1,
            Self::Fc0012 => 2,
            Self::Fc0013 => 3,
            Self::Fc2580 => 4,
            Self::R820t => 5,
            Self::R828d => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::E4000 => "E4000",
            Self::Fc0012 => "FC0012",
            Self::Fc0013 => "FC0013",
            Self::Fc2580 => "FC2580",
            Self::R820t => "R820T/2",
            Self::R828d => "R828D",
        }
    }
}

impl fmt::Display for TunerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
