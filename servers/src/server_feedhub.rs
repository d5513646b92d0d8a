//! # feedhub Service
//!
//! Runs the two ingestion paths against the configured upstream:
//!
//! - the global feed loop, which catches up on the feed every period, fans
//!   new items out by classification and persists its cursor;
//! - the entity poller, which pulls a snapshot of every tracked entity and
//!   feeds it into the entity log registry.
//!
//! A small subscriber on the global topic logs every item that goes out.
//! Ctrl+C or SIGTERM cancels everything and the process exits once the
//! loops have returned.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lib_feedhub::configs::{CursorSettings, ResolvedConfig, ServiceConfig, SourceSettings};
use lib_feedhub::connections::{CursorBackend, FileCursorStore, MemoryCursorStore, RedisCursorStore};
use lib_feedhub::core::{EntityLogRegistry, FanoutSettings, LogSettings, TypedFanoutBus};
use lib_feedhub::ingestors::{CatchUpFetcher, EntityPoller, IngestionLoop, IngestionSettings};
use lib_feedhub::loggers::setup_logging;
use lib_feedhub::retrieve::{HttpArchive, HttpFeed};
use lib_feedhub::sources::{ArchiveSource, FeedSource, NoArchive, StaticFeed};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = ServiceConfig::load().context("failed to load configuration")?;
    let resolved = config.resolve().context("invalid configuration")?;
    let _log_guard =
        setup_logging(&resolved.log_dir, &resolved.log_level).context("failed to initialize logging")?;

    let upstream = Arc::new(build_feed_source(&resolved).await?);
    let archive = build_archive_source(&resolved)?;
    let cursor_store = build_cursor_store(&resolved).await?;
    let clock = Arc::new(resolved.clock.clone().into_time_source());

    let registry = Arc::new(EntityLogRegistry::new(
        archive,
        LogSettings {
            gate_permits: resolved.gate_permits,
            subscriber_buffer: resolved.subscriber_buffer,
            max_version: resolved.max_version,
        },
    ));
    let bus = Arc::new(TypedFanoutBus::new(FanoutSettings {
        subscriber_buffer: resolved.subscriber_buffer,
        ..FanoutSettings::default()
    }));

    let ingestion = Arc::new(IngestionLoop::new(
        Arc::clone(&upstream),
        cursor_store,
        Arc::clone(&clock),
        Arc::clone(&bus),
        CatchUpFetcher::default(),
        IngestionSettings {
            period: resolved.poll_period,
            ..IngestionSettings::default()
        },
    ));
    let poller = Arc::new(EntityPoller::new(
        upstream,
        Arc::clone(&registry),
        clock,
        resolved.entity_poll_period,
    ));
    for entity_id in &resolved.entities {
        poller.track(entity_id.clone());
    }

    let cancel = CancellationToken::new();

    let ingestion_task = {
        let ingestion = Arc::clone(&ingestion);
        let cancel = cancel.clone();
        tokio::spawn(async move { ingestion.run(cancel).await })
    };
    let poller_task = {
        let poller = Arc::clone(&poller);
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };
    let feed_logger_task = {
        let mut feed = bus.subscribe_global();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = feed.recv() => match item {
                        Some(item) => info!(id = %item.id, classification = %item.classification, "feed item"),
                        None => break,
                    },
                }
            }
            if feed.dropped() > 0 {
                warn!(dropped = feed.dropped(), "feed logger fell behind");
            }
        })
    };

    info!(
        entities = resolved.entities.len(),
        poll_ms = resolved.poll_period.as_millis() as u64,
        "feedhub running"
    );

    shutdown_signal().await;
    info!("shutdown signal received, stopping ingestion");
    cancel.cancel();

    for (name, task) in [
        ("ingestion", ingestion_task),
        ("entity poller", poller_task),
        ("feed logger", feed_logger_task),
    ] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }

    info!(
        cursor = ?ingestion.cursor(),
        entities = registry.len(),
        classifications = bus.classifications().len(),
        "feedhub stopped"
    );
    Ok(())
}

async fn build_feed_source(config: &ResolvedConfig) -> Result<FeedSource> {
    Ok(match &config.source {
        SourceSettings::Live { upstream_url } => FeedSource::Live(
            HttpFeed::new(upstream_url, config.http_timeout).context("invalid upstream url")?,
        ),
        SourceSettings::Static { path } => FeedSource::Static(
            StaticFeed::from_path(path)
                .await
                .with_context(|| format!("failed to load capture {}", path.display()))?,
        ),
    })
}

fn build_archive_source(config: &ResolvedConfig) -> Result<ArchiveSource> {
    Ok(match &config.archive_url {
        Some(url) => ArchiveSource::Http(HttpArchive::new(url, config.http_timeout).context("invalid archive url")?),
        None => ArchiveSource::Disabled(NoArchive),
    })
}

async fn build_cursor_store(config: &ResolvedConfig) -> Result<CursorBackend> {
    Ok(match &config.cursor {
        CursorSettings::File(path) => CursorBackend::File(FileCursorStore::new(path.clone())),
        CursorSettings::Redis { url, key } => CursorBackend::Redis(
            RedisCursorStore::connect(url, key.clone())
                .await
                .context("failed to connect to redis")?,
        ),
        CursorSettings::Memory => CursorBackend::Memory(MemoryCursorStore::default()),
    })
}

/// Resolves on Ctrl+C, or on SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
