use anyhow::Context;
use tracing::info;

use stockcart_app::{AppConfig, Services};

fn main() -> anyhow::Result<()> {
    stockcart_observability::init();

    let config = AppConfig::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let services = if config.use_persistent_stores {
        Services::persistent(config, &runtime).context("failed to build persistent services")?
    } else {
        Services::in_memory(config)
    };

    services
        .rebuild_read_models()
        .context("failed to rebuild read models")?;

    let projections = services
        .start_projection_worker()
        .context("failed to start projection worker")?;
    let reclaimer = services.start_reclaimer().context("failed to start expiry worker")?;

    info!(
        cart_ttl_secs = services.config.cart_ttl.as_secs(),
        sweep_interval_secs = services.config.sweep_interval.as_secs(),
        "stockcart reclaimer running"
    );

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    reclaimer.shutdown();
    projections.shutdown();
    Ok(())
}
