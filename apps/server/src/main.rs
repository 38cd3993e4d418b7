//! Stowage upload server entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting stowage server"
    );

    let config = config::Config::load()?;
    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        chunk_size = config.chunk_size,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
