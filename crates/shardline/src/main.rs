//! Demo bot
//!
//! Run with:
//! ```bash
//! SHARDLINE_TOKEN=... cargo run -p shardline
//! ```
//!
//! Logs in, prints debug lines and dispatch names until Ctrl-C.

use anyhow::Context;
use shardline::{Client, ClientConfig, ClientEvent};
use shardline_common::{try_init_tracing_with_config, TracingConfig};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Demo bot failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("failed to load configuration")?;
    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    let token = ClientConfig::token_from_env().context("SHARDLINE_TOKEN is required")?;
    let client = Arc::new(Client::from_config(&config)?);

    let mut events = client.events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Dispatch(event)) => {
                    info!(shard_id = event.shard_id, seq = ?event.sequence, "{}", event.name);
                }
                Ok(ClientEvent::Debug { shard_id, message }) => {
                    info!(shard_id, "[debug] {message}");
                }
                Ok(ClientEvent::ShardFailed { shard_id, error }) => {
                    error!(shard_id, error = %error, "Shard failed");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let login = {
        let client = Arc::clone(&client);
        async move { client.login(token).await }
    };
    tokio::select! {
        result = login => {
            let user = result.context("login failed")?;
            info!(username = ?user.get("username"), "Ready, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted during login");
        }
    }

    info!("Shutting down");
    client.destroy().await;
    printer.abort();
    Ok(())
}
