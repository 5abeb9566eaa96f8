//! # Development Control Plane Binary
//!
//! Runs the in-memory control plane from [`sealed_deploy::devserver`] so that
//! `deployctl` can be exercised locally.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin dev_control_plane -- --config config/dev_control_plane.toml
//! ```

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;

use sealed_deploy::common::config::load_config;
use sealed_deploy::devserver::{DevControlPlane, DevServerConfig};

/// Command-line arguments for the development control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML format)
    ///
    /// Example: config/dev_control_plane.toml
    #[arg(short, long)]
    config: String,

    /// Overrides the listen address from the config file
    #[arg(long)]
    listen: Option<String>,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Format: `[HH:MM:SS] [LEVEL] message`
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config: DevServerConfig = load_config(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("🌐 Development control plane running on http://{}", listener.local_addr()?);
    info!(
        "📜 Jobs stay pending for {} poll(s), long-poll window {} ms",
        config.script.pending_polls, config.long_poll_window_ms
    );

    DevControlPlane::new(config).serve(listener).await?;

    Ok(())
}
