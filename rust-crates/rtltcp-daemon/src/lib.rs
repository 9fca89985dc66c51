//! rtltcp daemon library
//!
//! Re-exports the daemon's modules for integration testing.

pub mod config;
pub mod dispatcher;
pub mod radio;
