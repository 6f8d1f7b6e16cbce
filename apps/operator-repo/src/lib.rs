#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use permissions_client::{
    HttpPermissionsClient, MemoryPermissionsClient, PermissionsClient, PermissionsClientConfig,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::Config,
    db::OperatorDb,
    operators::{service::OperatorService, store, store::OperatorStore},
    server::{AppState, build_router},
};

pub mod config;
pub mod db;
pub mod operators;
pub mod server;

async fn build_store(config: &Config) -> Result<Arc<dyn OperatorStore>> {
    match config.db_url.as_deref() {
        Some(url) => {
            let db = OperatorDb::connect(url, config.db_connect_timeout).await?;
            db.migrate().await?;
            info!("operator store backed by postgres");
            Ok(store::postgres(Arc::new(db)))
        }
        None => {
            info!("DATABASE_URL not set; operator store is in memory");
            Ok(store::memory())
        }
    }
}

fn build_permissions(config: &Config) -> Result<Arc<dyn PermissionsClient>> {
    if config.uses_mock_permissions() {
        info!("permissions service mocked in process");
        return Ok(Arc::new(MemoryPermissionsClient::new(
            config.permissions_admin_token.clone(),
        )));
    }
    let client = HttpPermissionsClient::new(PermissionsClientConfig {
        base_url: config.permissions_url.clone(),
        timeout_ms: u64::try_from(config.dependency_timeout.as_millis()).unwrap_or(u64::MAX),
    })
    .context("build permissions client")?;
    Ok(Arc::new(client))
}

/// Connects dependencies, registers the permission topic and, unless
/// disabled, reconciles permissions before any traffic is accepted.
pub async fn build_state(config: Config) -> Result<AppState> {
    let store = build_store(&config).await?;
    let permissions = build_permissions(&config)?;
    let service = OperatorService::new(
        store,
        permissions,
        config.permissions_admin_token.clone(),
        config.dependency_timeout,
    );

    service
        .ensure_topic()
        .await
        .context("register operator permission topic")?;
    if config.reconcile_on_startup {
        service
            .reconciler()
            .reconcile()
            .await
            .context("reconcile operator permissions")?;
    } else {
        info!("startup permission reconciliation disabled");
    }

    Ok(AppState::new(config, service))
}

pub async fn build_app(config: Config) -> Result<axum::Router> {
    Ok(build_router(build_state(config).await?))
}

pub async fn serve(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr;
    let service_name = config.service_name.clone();
    let app = build_app(config).await?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(
        service = %service_name,
        bind_addr = %bind_addr,
        "operator repository listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("operator repository stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        ) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                    _ = quit.recv() => {},
                }
            }
            (Err(error), _) | (_, Err(error)) => {
                tracing::warn!(reason = %error, "SIGTERM/SIGQUIT handler unavailable; waiting for ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
