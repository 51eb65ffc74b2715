use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use folklore::archive::{LeiArchive, MailArchive};
use folklore::config::TrackerConfig;
use folklore::notify::{DiscordNotifier, Notifier};
use folklore::server::{AppState, tracker_routes};
use folklore::store::legacy::import_legacy_state;
use folklore::store::{Database, LibSqlBackend};
use folklore::tracker::{
    Classifier, LifecycleStore, MessageTracker, PollDriver, ReconciliationEngine, Renderer,
    SubscriptionRouter, spawn_poll_driver,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout plus a daily-rotated file
    let log_dir = std::env::var("FOLKLORE_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "folklore.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let config = TrackerConfig::load().context("Failed to load configuration")?;
    let token = config.require_discord_token().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export DISCORD_TOKEN=...");
        std::process::exit(1);
    });
    let merge_url = config.merge_url_regex()?;

    eprintln!("📜 folklore v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Subsystems: {}", config.subsystems.len());
    eprintln!("   Subscriptions: {}", config.subscriptions.len());
    eprintln!("   Poll interval: {}s", config.poll_interval_secs);
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);
    eprintln!("   Logs: {}/folklore.log", log_dir);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Tracker ──────────────────────────────────────────────────────────
    let archive: Arc<dyn MailArchive> = Arc::new(LeiArchive::new(config.lei_config()));
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(token));
    let lifecycle = Arc::new(LifecycleStore::new(Arc::clone(&db), config.retention_cap));
    let messages = MessageTracker::new(Arc::clone(&db));
    let router = Arc::new(SubscriptionRouter::new(
        config.subscriptions.clone(),
        config.github_projects.clone(),
    ));
    let classifier = Arc::new(Classifier::new(
        Arc::clone(&archive),
        config.merge_bot_address.clone(),
        merge_url,
    ));

    if let Some(dir) = &config.legacy_state_dir {
        let report = import_legacy_state(dir, &lifecycle, &messages)
            .await
            .with_context(|| format!("Failed to import legacy state from {}", dir.display()))?;
        eprintln!(
            "   Legacy import: {} PR(s), {} mapping(s), {} skipped",
            report.pull_requests, report.mappings, report.skipped
        );
    }

    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&lifecycle),
        messages.clone(),
        Arc::clone(&classifier),
        Arc::clone(&archive),
        Arc::clone(&notifier),
        config.reconcile_lookback(),
    ));

    let driver = Arc::new(PollDriver::new(
        Arc::clone(&archive),
        classifier,
        Arc::clone(&lifecycle),
        messages,
        Arc::clone(&router),
        Arc::clone(&notifier),
        config.subsystems.clone(),
        config.lookback(),
    ));
    let (poll_handle, poll_shutdown) = spawn_poll_driver(driver, config.poll_interval());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = tracker_routes(AppState {
        lifecycle,
        router,
        engine,
        notifier,
        renderer: Renderer::new(archive),
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "HTTP server started");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server stopped: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    eprintln!("\n   Shutting down...");
    poll_shutdown.store(true, Ordering::Relaxed);
    server.abort();
    poll_handle.abort();

    Ok(())
}
