//! rtltcp daemon
//!
//! Serves an rtl_tcp compatible IQ stream on TCP (default port 1234) so
//! existing SDR front-ends can connect. Samples come from a simulated
//! radio; client commands retune it.

use anyhow::{Context, Result};
use clap::Parser;
use rtltcp_broadcaster::RtlTcpServer;
use rtltcp_daemon::config::DaemonConfig;
use rtltcp_daemon::dispatcher::CommandDispatcher;
use rtltcp_daemon::radio::{RadioControl, SimulatedRadio};
use rtltcp_proto::DongleInfo;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(version, about = "rtl_tcp compatible IQ server")]
struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Starting rtltcp daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = DaemonConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Configuration loaded from {}", config.config_path.display());

    let server = Arc::new(RtlTcpServer::new(config.server_config()));
    server.set_dongle_info(DongleInfo::new(config.tuner_type, config.gain_steps));

    // Weak so the server -> handler -> radio -> sink chain does not cycle
    let sink = Arc::downgrade(&server);
    let radio = Arc::new(SimulatedRadio::new(
        config.radio_settings(),
        config.block_size,
        config.tone_offset_hz,
        move |samples| {
            if let Some(server) = sink.upgrade() {
                server.complex_broadcast(samples);
            }
        },
    ));
    if config.gain_db > 0.0 {
        radio
            .set_gain_db(config.gain_db)
            .context("Invalid initial gain")?;
    }

    let dispatcher = CommandDispatcher::new(Arc::clone(&radio), config.gain_steps, config.gain_step_db);
    server.set_on_command(move |session, command| dispatcher.handle(session, command));
    server.set_on_connect(|session, peer| {
        info!("New connection from {} [{}]", peer, session);
    });

    radio.start().context("Failed to start radio")?;
    let addr = server
        .start()
        .await
        .context("Failed to start rtl_tcp server")?;

    info!("Ready on {}", addr);
    info!(
        "  - Tuner: {}, {} gain steps",
        config.tuner_type, config.gain_steps
    );
    info!(
        "  - Center frequency: {} Hz, sample rate: {} S/s",
        config.center_frequency, config.sample_rate
    );

    let stats_task = (config.stats_interval_secs > 0).then(|| {
        let server = Arc::clone(&server);
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match serde_json::to_string(&server.stats()) {
                    Ok(line) => info!("Stats: {}", line),
                    Err(e) => tracing::warn!("Failed to serialize stats: {}", e),
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    if let Some(task) = stats_task {
        task.abort();
    }

    // Listener first, then the producer, then the transmit loop
    server.stop().await;
    let producer = Arc::clone(&radio);
    tokio::task::spawn_blocking(move || producer.stop())
        .await
        .context("Radio stop task failed")?;
    server.shutdown().await;

    info!("Final stats: {}", serde_json::to_string(&server.stats())?);
    info!("Closed!");

    Ok(())
}
