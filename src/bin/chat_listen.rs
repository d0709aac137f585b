//! Join a channel and print state changes and keyword matches
//!
//! Usage: `chat_listen <channel> [keyword-pattern ...]`

use anyhow::{bail, Result};
use chatlink_app::bin_common::{init_tracing, load_config_from_env, parse_args, ShutdownManager};
use chatlink_app::chatlink::{ChannelEvent, ChatTransport, ReqwestRequester, TransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const TICK: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info");

    let args = parse_args();
    let Some((channel_id, keywords)) = args.split_first() else {
        bail!("usage: chat_listen <channel> [keyword-pattern ...]");
    };

    let config_path = load_config_from_env();
    let transport = if config_path.exists() {
        ChatTransport::from_config_file(&config_path, Arc::new(ReqwestRequester::new()?))?
    } else {
        warn!("Config file {} not found, using defaults", config_path.display());
        let mut config = TransportConfig::default();
        config.apply_env_overrides();
        ChatTransport::with_http(config)?
    };
    let channel = transport.channel(channel_id);
    let events = channel.subscribe();

    for pattern in keywords {
        let keyword = pattern.clone();
        channel.register_keyword(pattern, move |matched, username| {
            info!("[{}] {} matched '{}'", keyword, username, matched);
        })?;
    }

    print_banner(channel.id(), keywords);

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    channel.connect()?;

    let mut ticker = tokio::time::interval(TICK);
    while shutdown.is_running() {
        ticker.tick().await;
        transport.dispatch_events();

        for event in events.try_iter() {
            if let ChannelEvent::StateChanged(state) = event {
                info!("Channel #{} is {}", channel.id(), state);
            }
        }
    }

    transport.shutdown();
    transport.dispatch_events();

    info!("========================================");
    info!("chat_listen stopped gracefully");
    info!("========================================");
    Ok(())
}

fn print_banner(channel: &str, keywords: &[String]) {
    info!("");
    info!("========================================");
    info!("Listening on #{}", channel);
    info!("Keywords: {:?}", keywords);
    info!("Press Ctrl+C to stop");
    info!("========================================");
    info!("");
}
