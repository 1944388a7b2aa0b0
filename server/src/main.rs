//! rideflow service entry point.

mod app;
mod config;

use app::Application;
use config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        region = %config.region_id,
        port = config.server.port,
        "starting rideflow server"
    );

    Application::build(config).await?.run().await
}
