//! Client side of the permissions-v2 capability service.
//!
//! The service stores, per topic and resource id, which users, groups and
//! roles hold read/write/execute/administrate rights. [`PermissionsClient`]
//! is the seam the rest of the workspace depends on; [`HttpPermissionsClient`]
//! talks to a deployed service and [`MemoryPermissionsClient`] keeps the same
//! state in process for tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;
mod memory;

pub use http::{DEFAULT_TIMEOUT_MS, HttpPermissionsClient, PermissionsClientConfig};
pub use memory::{MemoryPermissionsClient, Principal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Execute,
    Administrate,
}

impl Permission {
    /// Single-letter code used in permissions-v2 query strings.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
            Self::Execute => "x",
            Self::Administrate => "a",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsMap {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub administrate: bool,
}

impl PermissionsMap {
    #[must_use]
    pub const fn full() -> Self {
        Self {
            read: true,
            write: true,
            execute: true,
            administrate: true,
        }
    }

    #[must_use]
    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Execute => self.execute,
            Permission::Administrate => self.administrate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    #[serde(default)]
    pub user_permissions: BTreeMap<String, PermissionsMap>,
    #[serde(default)]
    pub group_permissions: BTreeMap<String, PermissionsMap>,
    #[serde(default)]
    pub role_permissions: BTreeMap<String, PermissionsMap>,
}

impl ResourcePermissions {
    /// True when the user, one of the groups or one of the roles holds `permission`.
    #[must_use]
    pub fn grants(
        &self,
        user_id: &str,
        groups: &[String],
        roles: &[String],
        permission: Permission,
    ) -> bool {
        let allowed = |map: &BTreeMap<String, PermissionsMap>, key: &str| {
            map.get(key).is_some_and(|entry| entry.allows(permission))
        };
        allowed(&self.user_permissions, user_id)
            || groups
                .iter()
                .any(|group| allowed(&self.group_permissions, group))
            || roles.iter().any(|role| allowed(&self.role_permissions, role))
    }

    /// Fills in entries from `defaults` that are not set explicitly.
    pub fn merge_defaults(&mut self, defaults: &ResourcePermissions) {
        for (key, value) in &defaults.user_permissions {
            self.user_permissions.entry(key.clone()).or_insert(*value);
        }
        for (key, value) in &defaults.group_permissions {
            self.group_permissions.entry(key.clone()).or_insert(*value);
        }
        for (key, value) in &defaults.role_permissions {
            self.role_permissions.entry(key.clone()).or_insert(*value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub topic_id: String,
    #[serde(flatten)]
    pub permissions: ResourcePermissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    #[serde(default)]
    pub default_permissions: ResourcePermissions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Error)]
pub enum PermissionsError {
    #[error("permissions_base_url_missing")]
    BaseUrlMissing,
    #[error("permissions_invalid_path")]
    InvalidPath,
    #[error("permissions_request_failed:{message}")]
    Request { message: String },
    #[error("permissions_read_failed:{message}")]
    Read { message: String },
    #[error("permissions_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("permissions_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("permissions_unauthorized")]
    Unauthorized,
    #[error("permissions_forbidden:{resource_id}")]
    Forbidden { resource_id: String },
    #[error("permissions_unknown_topic:{topic_id}")]
    UnknownTopic { topic_id: String },
}

/// Capability oracle used by the operator repository.
///
/// Every call may fail with a transport or authorization error; callers are
/// expected to abort the current operation rather than guess an answer.
#[async_trait]
pub trait PermissionsClient: Send + Sync {
    async fn set_topic(&self, admin_token: &str, topic: Topic) -> Result<Topic, PermissionsError>;

    async fn check_permission(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
        permission: Permission,
    ) -> Result<bool, PermissionsError>;

    async fn list_accessible_resource_ids(
        &self,
        token: &str,
        topic_id: &str,
        options: ListOptions,
        permission: Permission,
    ) -> Result<Vec<String>, PermissionsError>;

    async fn list_resources_with_admin_permission(
        &self,
        token: &str,
        topic_id: &str,
        options: ListOptions,
    ) -> Result<Vec<Resource>, PermissionsError>;

    /// Upsert: creates the resource entry when missing, replaces it otherwise.
    async fn set_permission(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
        permissions: ResourcePermissions,
    ) -> Result<ResourcePermissions, PermissionsError>;

    async fn remove_resource(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
    ) -> Result<(), PermissionsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_consider_users_groups_and_roles() {
        let mut permissions = ResourcePermissions::default();
        permissions.user_permissions.insert(
            "u1".to_string(),
            PermissionsMap {
                read: true,
                ..PermissionsMap::default()
            },
        );
        permissions
            .group_permissions
            .insert("analysts".to_string(), PermissionsMap::full());
        permissions
            .role_permissions
            .insert("admin".to_string(), PermissionsMap::full());

        assert!(permissions.grants("u1", &[], &[], Permission::Read));
        assert!(!permissions.grants("u1", &[], &[], Permission::Write));
        assert!(permissions.grants(
            "u2",
            &["analysts".to_string()],
            &[],
            Permission::Write
        ));
        assert!(permissions.grants("u3", &[], &["admin".to_string()], Permission::Administrate));
        assert!(!permissions.grants("u3", &[], &["user".to_string()], Permission::Read));
    }

    #[test]
    fn permission_codes_are_the_query_letters() {
        let codes: Vec<_> = [
            Permission::Read,
            Permission::Write,
            Permission::Execute,
            Permission::Administrate,
        ]
        .into_iter()
        .map(Permission::code)
        .collect();
        assert_eq!(codes, ["r", "w", "x", "a"]);
    }

    #[test]
    fn merge_defaults_keeps_explicit_entries() {
        let mut permissions = ResourcePermissions::default();
        permissions
            .role_permissions
            .insert("admin".to_string(), PermissionsMap::default());
        let mut defaults = ResourcePermissions::default();
        defaults
            .role_permissions
            .insert("admin".to_string(), PermissionsMap::full());
        defaults
            .role_permissions
            .insert("ops".to_string(), PermissionsMap::full());

        permissions.merge_defaults(&defaults);

        assert_eq!(
            permissions.role_permissions.get("admin"),
            Some(&PermissionsMap::default())
        );
        assert_eq!(
            permissions.role_permissions.get("ops"),
            Some(&PermissionsMap::full())
        );
    }

    #[test]
    fn resource_wire_format_flattens_permissions() {
        let resource: Resource = serde_json::from_value(serde_json::json!({
            "id": "op-1",
            "topic_id": "analytics-operators",
            "user_permissions": {
                "u1": {"read": true, "write": true, "execute": true, "administrate": true}
            },
            "group_permissions": {},
            "role_permissions": {"admin": {"read": true}}
        }))
        .expect("resource decodes");

        assert_eq!(resource.id, "op-1");
        assert_eq!(
            resource.permissions.user_permissions.get("u1"),
            Some(&PermissionsMap::full())
        );
        assert!(
            resource
                .permissions
                .role_permissions
                .get("admin")
                .is_some_and(|entry| entry.read && !entry.write)
        );
    }
}
