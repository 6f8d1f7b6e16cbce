use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use permissions_client::{ListOptions, PermissionsClient, ResourcePermissions};
use serde::Serialize;

use crate::operators::access::{TOPIC, grant_owner};
use crate::operators::bounded;
use crate::operators::query::{QueryArgs, QueryBuilder};
use crate::operators::service::OperatorError;
use crate::operators::store::OperatorStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records whose permission entry was pushed.
    pub synced: usize,
    /// Of those, records that had no entry before this pass.
    pub created: usize,
    /// Permission entries removed because no record backs them.
    pub removed: Vec<String>,
}

/// Brings the permissions service in line with the operator store.
///
/// Every stored record ends up with an entry granting its owner full rights
/// (other grants are carried over), and entries without a record are
/// removed. The first failing call aborts the pass; rerunning converges
/// because every step is an upsert or an idempotent delete.
#[derive(Clone)]
pub struct PermissionReconciler {
    store: Arc<dyn OperatorStore>,
    permissions: Arc<dyn PermissionsClient>,
    queries: QueryBuilder,
    admin_token: String,
    timeout: Duration,
}

impl PermissionReconciler {
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

    pub async fn reconcile(&self) -> Result<ReconcileReport, OperatorError> {
        tracing::debug!(topic = TOPIC, "reconciling operator permissions");

        let everything = self
            .queries
            .build("", true, &QueryArgs::default(), &self.admin_token)
            .await?;
        let operators = bounded(
            "store",
            self.timeout,
            self.store.find(
                &everything.filter,
                everything.sort,
                everything.limit,
                everything.skip,
            ),
        )
        .await?;
        let resources = bounded(
            "permissions",
            self.timeout,
            self.permissions.list_resources_with_admin_permission(
                &self.admin_token,
                TOPIC,
                ListOptions::default(),
            ),
        )
        .await?;

        let mut existing: BTreeMap<String, ResourcePermissions> = resources
            .into_iter()
            .map(|resource| (resource.id, resource.permissions))
            .collect();
        let registered: BTreeSet<String> = existing.keys().cloned().collect();

        let mut report = ReconcileReport::default();
        let mut live = BTreeSet::new();
        for operator in &operators {
            let mut permissions = match existing.remove(&operator.id) {
                Some(permissions) => permissions,
                None => {
                    report.created += 1;
                    ResourcePermissions::default()
                }
            };
            grant_owner(&mut permissions, &operator.user_id);

            bounded(
                "permissions",
                self.timeout,
                self.permissions.set_permission(
                    &self.admin_token,
                    TOPIC,
                    &operator.id,
                    permissions,
                ),
            )
            .await?;
            live.insert(operator.id.clone());
            report.synced += 1;
        }

        for orphan in registered.difference(&live) {
            bounded(
                "permissions",
                self.timeout,
                self.permissions
                    .remove_resource(&self.admin_token, TOPIC, orphan),
            )
            .await?;
            tracing::debug!(
                operator_id = %orphan,
                "permission entry had no operator record and was removed"
            );
            report.removed.push(orphan.clone());
        }

        tracing::info!(
            synced = report.synced,
            created = report.created,
            removed = report.removed.len(),
            "operator permissions reconciled"
        );
        Ok(report)
    }
}
