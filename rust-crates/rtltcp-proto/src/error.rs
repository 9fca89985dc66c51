use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Command frame must be {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Dongle info must be {expected} bytes, got {actual}")]
    DongleInfoLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
