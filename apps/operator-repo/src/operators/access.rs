use std::time::Duration;

use permissions_client::{PermissionsClient, PermissionsMap, ResourcePermissions, Topic};

use crate::operators::bounded;
use crate::operators::service::OperatorError;

/// Permission topic every operator resource is registered under.
pub const TOPIC: &str = "analytics-operators";

/// Role that receives full rights on every operator by default.
pub const ADMIN_ROLE: &str = "admin";

#[must_use]
pub fn topic() -> Topic {
    let mut default_permissions = ResourcePermissions::default();
    default_permissions
        .role_permissions
        .insert(ADMIN_ROLE.to_string(), PermissionsMap::full());
    Topic {
        id: TOPIC.to_string(),
        default_permissions,
    }
}

/// Re-asserts the owner's full grant, leaving every other entry as it was.
pub fn grant_owner(permissions: &mut ResourcePermissions, owner_id: &str) {
    permissions
        .user_permissions
        .insert(owner_id.to_string(), PermissionsMap::full());
}

#[must_use]
pub fn owner_permissions(owner_id: &str) -> ResourcePermissions {
    let mut permissions = ResourcePermissions::default();
    grant_owner(&mut permissions, owner_id);
    permissions
}

pub async fn ensure_topic(
    permissions: &dyn PermissionsClient,
    admin_token: &str,
    timeout: Duration,
) -> Result<(), OperatorError> {
    bounded("permissions", timeout, permissions.set_topic(admin_token, topic())).await?;
    tracing::info!(topic = TOPIC, "operator permission topic registered");
    Ok(())
}
