//! Sweep Capture - remote RF monitoring node
//!
//! Drives an RTL-SDR through wideband PSD sweeps with trigger-initiated
//! spectrogram capture, plus raw dual-frequency TDOA sampling via an
//! external tool. Commands arrive as JSON lines on stdin; result payloads
//! leave as length-prefixed frames on stdout.

mod commands;
mod config;
mod device;
mod dsp;
mod engine;
mod error;
mod link;
mod stream;
mod tdoa;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use commands::Command;
use config::Config;
use engine::Engine;
use link::StdoutLink;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (stderr; stdout carries data frames)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("===========================================");
    info!("   Sweep Capture - RF monitoring node");
    info!("===========================================");

    let config = Config::from_env();

    info!("Configuration:");
    info!("  Device index: {}", config.device_index);
    info!("  Gain: {} dB", config.gain_db);
    info!("  PPM error: {}", config.ppm_error);
    info!("  Sample rate: {} MSPS", config.sample_rate / 1e6);
    info!("  TDOA tool: {:?}", config.tdoa_tool_path);
    info!("  Spectrogram format: {:?}", config.spectro_format);

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);

    // Feed console commands from stdin
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Command>(line) {
                Ok(cmd) => {
                    if cmd_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring malformed command: {}", e),
            }
        }
        info!("Command input closed");
    });

    let link = Arc::new(StdoutLink::new());
    let engine = Engine::new(config, link);
    let stats = engine.stats();

    info!("===========================================");
    info!("  Waiting for console commands...");
    info!("===========================================");

    engine.run(cmd_rx).await?;

    info!(
        "Shutdown complete. Sweeps: {}, triggers: {}, TDOA jobs: {}",
        stats.sweeps_completed.load(Ordering::Relaxed),
        stats.triggers_fired.load(Ordering::Relaxed),
        stats.tdoa_jobs.load(Ordering::Relaxed),
    );
    Ok(())
}
