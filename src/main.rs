//! chatbridge - batches chat events into multimodal completion requests.
//!
//! Wiring only: configuration, the listener thread, the HTTP client and
//! the dispatch loop. Runs until interrupted.

#![forbid(unsafe_code)]

use anyhow::Context;
use chatbridge::client::HttpChatClient;
use chatbridge::config::BridgeConfig;
use chatbridge::dispatcher::Dispatcher;
use chatbridge::events::EventBuffer;
use chatbridge::listener::spawn_stdin_listener;
use chatbridge::transcript::Transcript;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("starting chatbridge");

    let config = BridgeConfig::from_env().context("loading configuration")?;
    std::fs::create_dir_all(&config.media_dir).with_context(|| {
        format!("creating media directory {}", config.media_dir.display())
    })?;
    info!(
        "incoming media should be saved under {}",
        config.media_dir.display()
    );

    let buffer = EventBuffer::new();
    spawn_stdin_listener(buffer.clone());

    let client = Arc::new(HttpChatClient::new(
        config.base_url.clone(),
        config.api_key.clone(),
    ));
    let transcript = Transcript::new(config.system_preamble.clone());

    let dispatcher = Dispatcher::new(config, buffer, client, transcript);
    let transcript = dispatcher.run().await;

    info!("stopped with {} transcript entries", transcript.len());
    Ok(())
}
