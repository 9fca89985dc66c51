//! Wire types for the rtl_tcp protocol
//!
//! rtl_tcp is a fixed legacy format spoken by most SDR front-ends. A server
//! greets every client with a 12 byte [`DongleInfo`] and then streams unsigned
//! 8-bit interleaved I/Q bytes. Clients steer the radio with 5 byte
//! [`Command`] frames.
//!
//! ```text
//! server -> client   "RTL0" | tuner u32 BE | gain count u32 BE      (once)
//! server -> client   I Q I Q I Q ...                                 (stream)
//! client -> server   opcode u8 | param u32 BE                        (any time)
//! ```
//!
//! All integers are big-endian. Nothing in here performs I/O.

pub mod command;
pub mod dongle;
pub mod error;
pub mod iq;
pub mod tuner;

pub use command::{Command, CommandType, COMMAND_SIZE};
pub use dongle::{DongleInfo, DONGLE_INFO_SIZE, DONGLE_MAGIC};
pub use error::{ProtocolError, Result};
pub use tuner::TunerType;

/// Complex sample type used on both ends of the stream
pub type IqSample = num_complex::Complex32;
