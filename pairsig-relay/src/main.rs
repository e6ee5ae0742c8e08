//! Pairsig signaling relay -- pairs two WebRTC clients into a numeric room
//! and forwards their negotiation messages.
//!
//! The relay never parses negotiation payloads -- it only decides who the
//! room peer is and whether a payload is the pairing's initial offer or a
//! follow-up signal.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin pairsig-relay
//!
//! # Run on custom address
//! cargo run --bin pairsig-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! PAIRSIG_ADDR=127.0.0.1:8080 cargo run --bin pairsig-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use pairsig_relay::config::{RelayCliArgs, RelayConfig};
use pairsig_relay::relay::{self, RelayState};

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

    tracing::info!(addr = %config.bind_addr, "starting pairsig relay server");

    let state = Arc::new(RelayState::with_config(config.max_signal_size));

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
