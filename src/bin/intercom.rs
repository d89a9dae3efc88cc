//! Group Intercom
//!
//! Joins a talk group described by a config file and streams voice to every
//! picked peer until Ctrl+C.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use group_intercom::{
    audio::{list_devices, CpalBackend},
    codec::OpusCodecFactory,
    config::AppConfig,
    network::TcpTransport,
    session::{Collaborators, TalkSession, TracingNotifier},
};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Group Intercom");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path)
        .context("No config file given and no default config location")?;
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();

    let session = TalkSession::start(
        &config,
        config.local_identity(),
        config.peer_identities(),
        Collaborators {
            transport: Arc::new(TcpTransport::new(config.network.clone())),
            backend: Arc::new(CpalBackend::default()),
            codecs: Arc::new(OpusCodecFactory::new(config.codec.clone())),
            notifier: Arc::new(TracingNotifier),
        },
    )?;

    tracing::info!("Talking as '{}' - press Ctrl+C to stop", config.identity.name);

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                for peer in session.peers() {
                    tracing::info!(
                        peer = %peer.name,
                        connected = peer.connected,
                        "Peer status"
                    );
                }
                let stats = session.capture().stats();
                tracing::info!(
                    "Stats: {:.1} KB broadcast, {} send-buffer overflows",
                    stats.bytes_broadcast as f64 / 1024.0,
                    stats.send_buffer.overflow_count
                );
            }
        }
    }

    tracing::info!("Shutting down");
    session.end_session();
    session.join().await;
    Ok(())
}
