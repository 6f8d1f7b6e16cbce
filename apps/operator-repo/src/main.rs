use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use analytics_operator_repo::{config::Config, serve};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.version,
        debug = config.debug,
        "starting operator repository"
    );
    serve(config).await
}
