//! MARQUEE Preload Entry Point
//!
//! Warms the configured collections against the live catalog, then keeps the
//! stale sweeper running until Ctrl-C.

use marquee_cache::stale_sweep_task;
use marquee_catalog::{build_service, init_tracing, CatalogConfig, CatalogError, CatalogResult};
use marquee_core::EngineConfig;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> CatalogResult<()> {
    init_tracing("marquee-preload")?;

    let engine_config = EngineConfig::from_env();
    let catalog_config = CatalogConfig::from_env();
    let service = build_service(engine_config, &catalog_config)?;

    tracing::info!(
        keys = catalog_config.preload_keys.len(),
        base_url = %catalog_config.base_url,
        "Preloading collections"
    );
    for (key, result) in service.preload(&catalog_config.preload_keys).await {
        match result {
            Ok(items) => tracing::info!(key = %key, items, "Collection preloaded"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Collection preload failed"),
        }
    }
    tracing::info!(stats = %serde_json::to_string(&service.stats()?)?, "Engine stats after preload");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(stale_sweep_task(
        service.clone(),
        service.config().sweep_interval,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CatalogError::Runtime {
            reason: format!("Failed to listen for shutdown signal: {}", e),
        })?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let metrics = sweeper.await.map_err(|e| CatalogError::Runtime {
        reason: format!("Sweeper task failed: {}", e),
    })?;

    tracing::info!(
        stats = %serde_json::to_string(&service.stats()?)?,
        sweep = %serde_json::to_string(&metrics.snapshot())?,
        "Final engine stats"
    );
    Ok(())
}
