use std::sync::Arc;
use std::time::Duration;

use tracing::info;

mod handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "belfry=info".into()),
        )
        .init();

    // load config: explicit path via BELFRY_CONFIG > ~/.belfry/belfry.toml
    let config_path = std::env::var("BELFRY_CONFIG").ok();
    let config = belfry_core::BelfryConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        belfry_core::BelfryConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(belfry_store::StateStore::new(conn)?);
    info!("database schema ready");

    // Handler registry — embedding applications register their own job
    // types here; the built-in log handler keeps a bare install usable.
    let registry = Arc::new(belfry_executor::HandlerRegistry::new());
    registry.register(Arc::new(handlers::LogMessageHandler));

    let executor = Arc::new(belfry_executor::JobExecutor::new(
        registry.clone(),
        store.clone(),
        config.node.id.clone(),
        Duration::from_secs(belfry_core::config::CANCEL_KILL_GRACE_SECS),
    ));

    let mut notifications = belfry_notify::NotificationService::new();
    notifications.add(Arc::new(belfry_notify::LogNotifier::new()));
    if let Some(ref webhook) = config.notifications.webhook {
        info!(url = %webhook.url, "webhook notifications enabled");
        notifications.add(Arc::new(belfry_notify::WebhookNotifier::new(webhook)));
    }

    let engine = Arc::new(belfry_engine::SchedulerEngine::new(
        store,
        executor,
        Arc::new(notifications),
        config.scheduler.clone(),
        config.node.id.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!(node = %config.node.id, "belfryd running — ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
