//! Operator catalogue: records, access-scoped queries, permission sync.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use permissions_client::PermissionsError;

use crate::operators::service::OperatorError;

pub mod access;
pub mod query;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod types;


/// Runs one dependency call under `timeout`, reporting both upstream
/// failures and elapsed time as `DependencyUnavailable`.
pub(crate) async fn bounded<T, E, F>(
    dependency: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, OperatorError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(OperatorError::DependencyUnavailable(format!(
            "{dependency}: {error}"
        ))),
        Err(_) => Err(OperatorError::DependencyUnavailable(format!(
            "{dependency}: timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Like [`bounded`] for calls made with the caller's own token: a rejected
/// token is the caller's problem, not the dependency's.
pub(crate) async fn bounded_as_caller<T, F>(
    timeout: Duration,
    call: F,
) -> Result<T, OperatorError>
where
    F: Future<Output = Result<T, PermissionsError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Err(PermissionsError::Unauthorized | PermissionsError::Forbidden { .. })) => Err(
            OperatorError::Unauthorized("permissions service rejected the caller".to_string()),
        ),
        Ok(Err(PermissionsError::Http { status, .. })) if status.as_u16() == 403 => Err(
            OperatorError::Unauthorized("permissions service rejected the caller".to_string()),
        ),
        Ok(result) => bounded("permissions", timeout, std::future::ready(result)).await,
        Err(_) => Err(OperatorError::DependencyUnavailable(format!(
            "permissions: timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
