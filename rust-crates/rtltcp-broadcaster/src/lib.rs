//! rtl_tcp compatible IQ server
//!
//! Streams 8-bit I/Q samples to every connected client and forwards the
//! 5 byte command frames they send to a caller supplied handler. The radio
//! itself lives outside this crate: a producer pushes sample blocks in with
//! [`RtlTcpServer::complex_broadcast`] and the command handler decides what a
//! frame means.
//!
//! # Tasks
//!
//! - accept loop: greets each connection with the dongle info and spawns a
//!   session reader
//! - session readers: one per client, reassemble command frames
//! - transmit loop: drains the chunk FIFO and writes every chunk to every
//!   session in 4096 byte segments
//!
//! Slow clients are never waited on. Writes are non-blocking and a full
//! socket buffer means that client misses whole segments, never half an I/Q
//! pair.
//!
//! # Example Usage
//!
//! ```no_run
//! use rtltcp_broadcaster::{RtlTcpServer, ServerConfig};
//! use rtltcp_proto::{DongleInfo, IqSample, TunerType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtlTcpServer::new(ServerConfig::new("0.0.0.0:1234"));
//!     server.set_dongle_info(DongleInfo::new(TunerType::R820t, 32));
//!     server.set_on_command(|session, cmd| {
//!         println!("{} -> {}", session, cmd);
//!         true
//!     });
//!     server.start().await?;
//!
//!     // Called by the radio whenever a block is ready
//!     server.complex_broadcast(&vec![IqSample::new(0.0, 0.0); 8192]);
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fifo;
pub mod server;
pub mod session;
pub mod stats;

// Re-exports
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use fifo::ChunkFifo;
pub use server::RtlTcpServer;
pub use session::SessionId;
pub use stats::ServerStats;
