//! cropsightd — inference request orchestrator daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use cropsight_core::config::CropsightConfig;
use cropsight_services::{
    AnalysisStore, Deadlines, FallbackRunner, LocalAssetStore, MemoryAnalysisStore, Orchestrator,
    PrimaryClient, ResultPersister, SqliteAnalysisStore, StagingArea, TaskRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load config
    if let Err(e) = CropsightConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CropsightConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CropsightConfig::default()
    });
    config.validate().context("invalid configuration")?;

    let state = build_state(&config)?;

    tracing::info!(
        primary_enabled = config.primary.enabled,
        primary_url = %config.primary.base_url,
        primary_timeout_ms = config.primary.timeout_ms,
        worker = %config.worker.executable.display(),
        worker_timeout_ms = config.worker.timeout_ms,
        worker_slots = config.worker.slots(),
        storage_enabled = config.storage.enabled,
        "cropsightd starting"
    );

    // Shutdown broadcast
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }
    let mut shutdown_rx = shutdown_tx.subscribe();

    cropsight_api::serve(state, &config.server.bind_addr, config.server.port, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    tracing::info!("shut down");
    Ok(())
}

fn build_state(config: &CropsightConfig) -> Result<cropsight_api::ApiState> {
    let staging = StagingArea::new(&config.server.staging_dir);
    match staging.sweep() {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, dir = %staging.root().display(), "removed leftover staged images"),
        Err(e) => tracing::warn!(error = %e, "failed to sweep staging directory"),
    }

    let mut orchestrator = Orchestrator::new(
        staging,
        TaskRegistry::from_config(&config.tasks),
        Arc::new(PrimaryClient::new(&config.primary)),
        Arc::new(FallbackRunner::new(&config.worker)),
        Deadlines {
            primary: config.primary.deadline(),
            fallback: config.worker.deadline(),
        },
    );

    let storage = &config.storage;
    let asset_dir = if storage.enabled {
        let assets = LocalAssetStore::new(&storage.asset_dir, &storage.asset_base_url)
            .with_context(|| format!("failed to open asset store at {}", storage.asset_dir.display()))?;

        let records: Arc<dyn AnalysisStore> = if storage.database_path.as_os_str().is_empty() {
            tracing::info!("no database path configured, history kept in memory");
            Arc::new(MemoryAnalysisStore::new())
        } else {
            Arc::new(SqliteAnalysisStore::open(&storage.database_path).with_context(|| {
                format!("failed to open analysis database {}", storage.database_path.display())
            })?)
        };

        orchestrator = orchestrator.with_persister(ResultPersister::new(
            Arc::new(assets),
            records,
            storage.persist_timeout(),
        ));
        Some(storage.asset_dir.clone())
    } else {
        None
    };

    Ok(cropsight_api::ApiState {
        orchestrator: Arc::new(orchestrator),
        history_limit: storage.history_limit,
        max_upload_bytes: config.server.max_upload_bytes,
        asset_dir,
    })
}
