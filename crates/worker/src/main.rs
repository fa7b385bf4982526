use anyhow::Context;
use tokio_util::sync::CancellationToken;

use catalog_infra::cache::RedisCache;
use catalog_infra::catalog::CategorySynchronizer;
use catalog_infra::config::CatalogConfig;
use catalog_infra::event_bus::RedisStreamsBroker;
use catalog_infra::store::PostgresItemStore;
use catalog_infra::workers::QuantityConsumer;
use catalog_products::topics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    catalog_observability::init();

    let config = CatalogConfig::from_env().context("invalid configuration")?;

    let store = PostgresItemStore::connect(&config.database_url)
        .await
        .context("failed to connect to the item store")?;
    store
        .ensure_schema()
        .await
        .context("failed to prepare the item store schema")?;

    // A stale category index is recoverable, so a failed rebuild is not fatal.
    match RedisCache::connect(&config.redis_url).await {
        Ok(cache) => {
            let categories =
                CategorySynchronizer::new(store.clone(), cache).with_delete_policy(config.delete_policy);
            if let Err(e) = categories.rebuild_cache().await {
                tracing::warn!(error = %e, "category cache rebuild failed at startup");
            }
        }
        Err(e) => tracing::warn!(error = %e, "category cache unavailable at startup"),
    }

    let broker = RedisStreamsBroker::connect(
        &config.redis_url,
        config.consumer_group.clone(),
        config.consumer_name.clone(),
        &[topics::PRODUCT_QUANTITY_UPDATED],
    )
    .await
    .context("failed to subscribe to the quantity topic")?
    .with_redelivery_interval(config.redelivery_interval);

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_signals(shutdown.clone()));

    let consumer = QuantityConsumer::new(store, broker, config.consumer());
    let stats = consumer.run(shutdown).await;

    tracing::info!(
        stats = %serde_json::to_string(&stats).unwrap_or_default(),
        "worker exiting"
    );
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn forward_signals(shutdown: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("interrupt received, shutting down"),
        _ = terminate => tracing::info!("terminate received, shutting down"),
    }
    shutdown.cancel();
}
