mod config;
mod forward;
mod platform;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::forward::{DedupCache, Dispatcher, ForwardStats, Router};
use crate::platform::telegram::{self, TelegramTransport};
use crate::platform::SinkSession;
use crate::scheduler::reaper::Reaper;
use crate::scheduler::Scheduler;

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tg_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Forwarding: {}", config.forward.enabled);
    if config.forward.enabled {
        info!("  Monitored groups: {:?}", config.forward.monitor_groups);
        info!("  Target chat: {}", config.forward.target);
        info!("  Filter: {:?}", config.filter);
        info!(
            "  Dedup: {} (window {:?})",
            config.dedup.enabled,
            config.dedup_window()
        );
        info!("  Delay: {:?}", config.forward_delay());
    }

    let listener = telegram::build_bot(&config.telegram.bot_token, &config.proxy)?;
    let transport = Arc::new(TelegramTransport::new(listener));

    let dispatcher = if config.forward.enabled {
        let destination = telegram::build_bot(&config.forward.bot_token, &config.proxy)?;
        let session: Arc<dyn SinkSession> = Arc::new(TelegramTransport::new(destination));
        Some(Dispatcher::new(
            session,
            config.bot_id().ok(),
            config.forward_target()?,
            config.retry_delay(),
        ))
    } else {
        None
    };
    let dedup = Arc::new(Mutex::new(DedupCache::new()));
    let stats = Arc::new(ForwardStats::new());

    let mut router = Router::new(&config, dispatcher, dedup.clone(), stats.clone());
    router.prepare(transport.as_ref()).await;

    let mut scheduler = Scheduler::new().await?;
    if router.forwarding_enabled() {
        let reaper = Arc::new(Reaper::new(dedup, stats.clone(), config.dedup_window()));
        reaper.register(&mut scheduler, config.reaper_interval()).await?;
    }
    info!(
        "Background jobs: {:?}",
        scheduler.job_names().collect::<Vec<_>>()
    );
    scheduler.start().await?;

    let (events, listener_task) = transport.subscribe(EVENT_BUFFER);

    info!("Relay is running. Press Ctrl-C to stop.");
    tokio::select! {
        _ = router.run(events) => {
            warn!("Update listener stopped");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down...");
        }
    }

    listener_task.abort();
    scheduler.shutdown().await?;
    info!("Final stats: {}", stats.snapshot());

    Ok(())
}
