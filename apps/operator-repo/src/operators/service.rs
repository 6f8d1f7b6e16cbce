use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use permissions_client::{Permission, PermissionsClient};
use uuid::Uuid;

use crate::operators::access::{self, TOPIC};
use crate::operators::query::{QueryArgs, QueryBuilder};
use crate::operators::reconcile::PermissionReconciler;
use crate::operators::store::{OperatorFilter, OperatorStore};
use crate::operators::types::{
    BatchDeleteFailure, BatchDeleteReport, Caller, Operator, OperatorResponse, OperatorUpdate,
};
use crate::operators::{bounded, bounded_as_caller};

#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl OperatorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidRequest(_) => "invalid_request",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotFound => "not found".to_string(),
            Self::Unauthorized(message)
            | Self::InvalidRequest(message)
            | Self::DependencyUnavailable(message) => message.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OperatorService {
    store: Arc<dyn OperatorStore>,
    permissions: Arc<dyn PermissionsClient>,
    queries: QueryBuilder,
    admin_token: String,
    timeout: Duration,
}

impl OperatorService {
    pub fn new(
        store: Arc<dyn OperatorStore>,
        permissions: Arc<dyn PermissionsClient>,
        admin_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            queries: QueryBuilder::new(permissions.clone(), timeout),
            store,
            permissions,
            admin_token: admin_token.into(),
            timeout,
        }
    }

    pub fn reconciler(&self) -> PermissionReconciler {
        PermissionReconciler::new(
            self.store.clone(),
            self.permissions.clone(),
            self.admin_token.clone(),
            self.timeout,
        )
    }

    pub async fn ensure_topic(&self) -> Result<(), OperatorError> {
        access::ensure_topic(self.permissions.as_ref(), &self.admin_token, self.timeout).await
    }

    /// Stores `operator` owned by the caller and grants the owner full rights
    /// before returning. A failed grant removes the record again.
    pub async fn create(
        &self,
        mut operator: Operator,
        caller: &Caller,
    ) -> Result<Operator, OperatorError> {
        let user_id = require_identity(caller)?;
        validate_name(&operator.name)?;
        operator.user_id = user_id.to_string();

        let stored = bounded("store", self.timeout, self.store.insert_one(operator)).await?;
        let granted = bounded(
            "permissions",
            self.timeout,
            self.permissions.set_permission(
                &self.admin_token,
                TOPIC,
                &stored.id,
                access::owner_permissions(user_id),
            ),
        )
        .await;

        if let Err(error) = granted {
            let removed = bounded(
                "store",
                self.timeout,
                self.store
                    .delete_one(&OperatorFilter::IdEquals(stored.id.clone())),
            )
            .await;
            if let Err(rollback) = removed {
                tracing::warn!(
                    operator_id = %stored.id,
                    reason = %rollback,
                    "operator without permission entry left for reconciliation"
                );
            }
            return Err(error);
        }

        tracing::info!(operator_id = %stored.id, user_id, "operator created");
        Ok(stored)
    }

    /// Overwrites the mutable fields of `id`. Id and owner are kept.
    pub async fn update(
        &self,
        id: &str,
        operator: Operator,
        caller: &Caller,
    ) -> Result<(), OperatorError> {
        require_identity(caller)?;
        let id = parse_operator_id(id)?;
        validate_name(&operator.name)?;
        self.require_permission(&id, caller, Permission::Write)
            .await?;

        let updated = bounded(
            "store",
            self.timeout,
            self.store.update_one(
                &OperatorFilter::IdEquals(id.clone()),
                OperatorUpdate::from(operator),
            ),
        )
        .await?;
        if !updated {
            return Err(OperatorError::NotFound);
        }
        tracing::info!(operator_id = %id, user_id = %caller.user_id, "operator updated");
        Ok(())
    }

    pub async fn delete(&self, id: &str, caller: &Caller) -> Result<(), OperatorError> {
        require_identity(caller)?;
        self.delete_checked(id, caller).await
    }

    /// Deletes every id the caller may write, reporting each outcome.
    ///
    /// Ids naming the same record are collapsed onto their first spelling,
    /// so a record appears in exactly one bucket.
    pub async fn delete_many(
        &self,
        ids: &[String],
        caller: &Caller,
    ) -> Result<BatchDeleteReport, OperatorError> {
        require_identity(caller)?;

        let mut seen = BTreeSet::new();
        let mut report = BatchDeleteReport::default();
        for id in ids {
            let key = parse_operator_id(id).unwrap_or_else(|_| id.clone());
            if !seen.insert(key) {
                continue;
            }
            match self.delete_checked(id, caller).await {
                Ok(()) => report.deleted.push(id.clone()),
                Err(OperatorError::InvalidRequest(_)) => report.invalid.push(id.clone()),
                Err(OperatorError::Unauthorized(_)) => report.unauthorized.push(id.clone()),
                Err(OperatorError::NotFound) => report.not_found.push(id.clone()),
                Err(OperatorError::DependencyUnavailable(reason)) => {
                    report.failed.push(BatchDeleteFailure {
                        id: id.clone(),
                        reason,
                    });
                }
            }
        }

        if !report.is_complete() {
            tracing::warn!(
                user_id = %caller.user_id,
                deleted = report.deleted.len(),
                invalid = report.invalid.len(),
                unauthorized = report.unauthorized.len(),
                not_found = report.not_found.len(),
                failed = report.failed.len(),
                "batch delete finished partially"
            );
        }
        Ok(report)
    }

    pub async fn get(&self, id: &str, caller: &Caller) -> Result<Operator, OperatorError> {
        require_identity(caller)?;
        let id = parse_operator_id(id)?;
        self.require_permission(&id, caller, Permission::Read)
            .await?;

        bounded(
            "store",
            self.timeout,
            self.store.find_one(&OperatorFilter::IdEquals(id)),
        )
        .await?
        .ok_or(OperatorError::NotFound)
    }

    /// Records the caller may read or owns, narrowed by `args`. The total
    /// ignores pagination.
    pub async fn list(
        &self,
        caller: &Caller,
        args: &QueryArgs,
    ) -> Result<OperatorResponse, OperatorError> {
        let user_id = require_identity(caller)?;
        let query = self
            .queries
            .build(user_id, false, args, &caller.auth_token)
            .await?;

        let operators = bounded(
            "store",
            self.timeout,
            self.store
                .find(&query.filter, query.sort, query.limit, query.skip),
        )
        .await?;
        let total = bounded("store", self.timeout, self.store.count(&query.filter)).await?;
        Ok(OperatorResponse { operators, total })
    }

    async fn delete_checked(&self, id: &str, caller: &Caller) -> Result<(), OperatorError> {
        let id = parse_operator_id(id)?;
        self.require_permission(&id, caller, Permission::Write)
            .await?;

        let deleted = bounded(
            "store",
            self.timeout,
            self.store
                .delete_one(&OperatorFilter::IdEquals(id.clone())),
        )
        .await?;
        if !deleted {
            return Err(OperatorError::NotFound);
        }
        bounded(
            "permissions",
            self.timeout,
            self.permissions
                .remove_resource(&self.admin_token, TOPIC, &id),
        )
        .await?;
        tracing::info!(operator_id = %id, user_id = %caller.user_id, "operator deleted");
        Ok(())
    }

    async fn require_permission(
        &self,
        id: &str,
        caller: &Caller,
        permission: Permission,
    ) -> Result<(), OperatorError> {
        let allowed = bounded_as_caller(
            self.timeout,
            self.permissions
                .check_permission(&caller.auth_token, TOPIC, id, permission),
        )
        .await?;
        if allowed {
            Ok(())
        } else {
            Err(OperatorError::Unauthorized(format!(
                "missing {} permission on operator {id}",
                permission.code()
            )))
        }
    }
}

fn require_identity(caller: &Caller) -> Result<&str, OperatorError> {
    let user_id = caller.user_id.trim();
    if user_id.is_empty() {
        return Err(OperatorError::Unauthorized("missing user id".to_string()));
    }
    Ok(user_id)
}

fn validate_name(name: &str) -> Result<(), OperatorError> {
    if name.trim().is_empty() {
        return Err(OperatorError::InvalidRequest(
            "operator name is required".to_string(),
        ));
    }
    Ok(())
}

fn parse_operator_id(raw: &str) -> Result<String, OperatorError> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .map_err(|_| OperatorError::InvalidRequest(format!("invalid operator id: {raw}")))
}
