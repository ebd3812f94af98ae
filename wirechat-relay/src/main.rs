//! `WireChat` relay server -- real-time message relay for chat, file
//! transfer, and call media.
//!
//! A TCP server speaking the framed, encrypted `WireChat` wire protocol.
//! Clients log in with a display name, land in the default room, and the
//! server routes room broadcasts, private messages, files, and
//! audio/video call frames between them.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5050
//! cargo run --bin wirechat-relay
//!
//! # Run on custom address
//! cargo run --bin wirechat-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! WIRECHAT_ADDR=127.0.0.1:8080 cargo run --bin wirechat-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use wirechat_relay::config::{RelayCliArgs, RelayConfig};
use wirechat_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = match RelayState::with_config(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "invalid frame key");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %config.bind_addr, "starting wirechat relay server");

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
