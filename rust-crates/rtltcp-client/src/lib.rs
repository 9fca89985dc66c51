//! rtl_tcp client
//!
//! Connects to any rtl_tcp compatible server, reads the dongle handshake and
//! turns the byte stream back into complex samples delivered in fixed-size
//! windows. Radio parameters are changed with 5 byte command frames.

pub mod client;
pub mod error;

pub use client::{ClientConfig, RtlTcpClient};
pub use error::{ClientError, Result};
