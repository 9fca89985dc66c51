//! Configuration management

use anyhow::{bail, Context, Result};
use rtltcp_broadcaster::ServerConfig;
use rtltcp_proto::TunerType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::radio::{validate_sample_rate, RadioSettings};

/// Server tuning, mostly for testing and constrained links
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTuning {
    /// Pending chunks kept before new ones are dropped
    pub fifo_depth: usize,

    /// Chunks buffered before the first transmission
    pub prime_chunks: usize,

    /// Session read deadline (milliseconds)
    pub read_timeout_ms: u64,

    /// Bytes per network write
    pub segment_size: usize,
}

impl Default for ServerTuning {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            fifo_depth: defaults.fifo_depth,
            prime_chunks: defaults.prime_chunks,
            read_timeout_ms: defaults.read_timeout.as_millis() as u64,
            segment_size: defaults.segment_size,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Listen address (empty = all interfaces)
    pub listen_address: String,

    /// Listen port
    pub port: u16,

    /// Tuner reported in the handshake
    pub tuner_type: TunerType,

    /// Number of discrete gain steps advertised to clients
    pub gain_steps: u32,

    /// dB between consecutive gain steps
    pub gain_step_db: f32,

    /// Initial centre frequency (Hz)
    pub center_frequency: u32,

    /// Initial sample rate (Hz)
    pub sample_rate: u32,

    /// Initial gain (dB)
    pub gain_db: f32,

    /// Samples per block handed to the broadcaster
    pub block_size: usize,

    /// Offset of the simulated test tone from the centre frequency (Hz)
    pub tone_offset_hz: f32,

    /// Seconds between stats log lines (0 = off)
    pub stats_interval_secs: u64,

    pub server: ServerTuning,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            listen_address: String::new(),
            port: 1234,
            tuner_type: TunerType::R820t,
            gain_steps: 32,
            gain_step_db: 2.5,
            center_frequency: 106_300_000,
            sample_rate: 2_048_000,
            gain_db: 0.0,
            block_size: 16384,
            tone_offset_hz: 10_000.0,
            stats_interval_secs: 30,
            server: ServerTuning::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path` (or the default location), creating a
    /// default file if none exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;

            let mut config: DaemonConfig =
                toml::from_str(&contents).context("Failed to parse config file")?;

            config.config_path = config_path;
            config.validate().with_context(|| {
                format!("Invalid configuration in {}", config.config_path.display())
            })?;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Reject settings the radio or server cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_sample_rate(self.sample_rate)?;

        if self.block_size == 0 {
            bail!("block_size must be greater than 0");
        }
        if !self.gain_db.is_finite() || self.gain_db < 0.0 {
            bail!("gain_db must be a non-negative number, got {}", self.gain_db);
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// `address:port` for the listener
    pub fn listen_socket(&self) -> String {
        let host = if self.listen_address.is_empty() {
            "0.0.0.0"
        } else {
            self.listen_address.as_str()
        };
        format!("{}:{}", host, self.port)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.listen_socket())
            .with_fifo_depth(self.server.fifo_depth)
            .with_prime_chunks(self.server.prime_chunks)
            .with_read_timeout(Duration::from_millis(self.server.read_timeout_ms))
            .with_segment_size(self.server.segment_size)
    }

    pub fn radio_settings(&self) -> RadioSettings {
        RadioSettings {
            center_frequency: self.center_frequency,
            sample_rate: self.sample_rate,
            gain_db: self.gain_db,
            manual_gain: self.gain_db > 0.0,
            agc: false,
        }
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rtltcp")
            .join("config.toml")
    }
}
