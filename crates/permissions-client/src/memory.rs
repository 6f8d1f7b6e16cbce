use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    ListOptions, Permission, PermissionsClient, PermissionsError, Resource, ResourcePermissions,
    Topic,
};

/// Identity a token resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|role| (*role).to_string()).collect();
        self
    }
}

enum Caller {
    Admin,
    Principal(Principal),
}

impl Caller {
    fn can(&self, permissions: &ResourcePermissions, permission: Permission) -> bool {
        match self {
            Self::Admin => true,
            Self::Principal(principal) => permissions.grants(
                &principal.user_id,
                &principal.groups,
                &principal.roles,
                permission,
            ),
        }
    }
}

#[derive(Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Default)]
struct TopicState {
    defaults: ResourcePermissions,
    resources: BTreeMap<String, ResourcePermissions>,
}

#[derive(Default)]
struct MemoryState {
    topics: HashMap<String, TopicState>,
    tokens: HashMap<String, Principal>,
}

/// In-process permissions service with the same observable contract as the
/// HTTP one. Used by tests and by the `mock` deployment mode.
#[derive(Clone)]
pub struct MemoryPermissionsClient {
    admin_token: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPermissionsClient {
    #[must_use]
    pub fn new(admin_token: impl Into<String>) -> Self {
        Self {
            admin_token: strip_bearer(&admin_token.into()).to_string(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub async fn register_token(&self, token: impl Into<String>, principal: Principal) {
        let token = token.into();
        let mut state = self.state.lock().await;
        state
            .tokens
            .insert(strip_bearer(&token).to_string(), principal);
    }

    /// Resource ids currently registered under `topic_id`, in id order.
    pub async fn resource_ids(&self, topic_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic_id)
            .map(|topic| topic.resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn resource_permissions(
        &self,
        topic_id: &str,
        resource_id: &str,
    ) -> Option<ResourcePermissions> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic_id)
            .and_then(|topic| topic.resources.get(resource_id).cloned())
    }

    fn resolve(&self, state: &MemoryState, token: &str) -> Result<Caller, PermissionsError> {
        let token = strip_bearer(token);
        if token.is_empty() {
            return Err(PermissionsError::Unauthorized);
        }
        if token == self.admin_token {
            return Ok(Caller::Admin);
        }
        if let Some(principal) = state.tokens.get(token) {
            return Ok(Caller::Principal(principal.clone()));
        }
        principal_from_jwt(token).map(Caller::Principal)
    }
}

#[async_trait]
impl PermissionsClient for MemoryPermissionsClient {
    async fn set_topic(&self, admin_token: &str, topic: Topic) -> Result<Topic, PermissionsError> {
        let mut state = self.state.lock().await;
        if !matches!(self.resolve(&state, admin_token)?, Caller::Admin) {
            return Err(PermissionsError::Unauthorized);
        }
        let entry = state.topics.entry(topic.id.clone()).or_default();
        entry.defaults = topic.default_permissions.clone();
        Ok(topic)
    }

    async fn check_permission(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
        permission: Permission,
    ) -> Result<bool, PermissionsError> {
        let state = self.state.lock().await;
        let caller = self.resolve(&state, token)?;
        let topic = state
            .topics
            .get(topic_id)
            .ok_or_else(|| PermissionsError::UnknownTopic {
                topic_id: topic_id.to_string(),
            })?;
        Ok(topic
            .resources
            .get(resource_id)
            .is_some_and(|permissions| caller.can(permissions, permission)))
    }

    async fn list_accessible_resource_ids(
        &self,
        token: &str,
        topic_id: &str,
        options: ListOptions,
        permission: Permission,
    ) -> Result<Vec<String>, PermissionsError> {
        let state = self.state.lock().await;
        let caller = self.resolve(&state, token)?;
        let Some(topic) = state.topics.get(topic_id) else {
            return Ok(Vec::new());
        };
        let ids = topic
            .resources
            .iter()
            .filter(|(_, permissions)| caller.can(permissions, permission))
            .map(|(id, _)| id.clone());
        Ok(paginate(ids, options))
    }

    async fn list_resources_with_admin_permission(
        &self,
        token: &str,
        topic_id: &str,
        options: ListOptions,
    ) -> Result<Vec<Resource>, PermissionsError> {
        let state = self.state.lock().await;
        let caller = self.resolve(&state, token)?;
        let Some(topic) = state.topics.get(topic_id) else {
            return Ok(Vec::new());
        };
        let resources = topic
            .resources
            .iter()
            .filter(|(_, permissions)| caller.can(permissions, Permission::Administrate))
            .map(|(id, permissions)| Resource {
                id: id.clone(),
                topic_id: topic_id.to_string(),
                permissions: permissions.clone(),
            });
        Ok(paginate(resources, options))
    }

    async fn set_permission(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
        permissions: ResourcePermissions,
    ) -> Result<ResourcePermissions, PermissionsError> {
        let mut state = self.state.lock().await;
        let caller = self.resolve(&state, token)?;
        let topic = state
            .topics
            .get_mut(topic_id)
            .ok_or_else(|| PermissionsError::UnknownTopic {
                topic_id: topic_id.to_string(),
            })?;
        let allowed = match topic.resources.get(resource_id) {
            Some(existing) => caller.can(existing, Permission::Administrate),
            None => matches!(caller, Caller::Admin),
        };
        if !allowed {
            return Err(PermissionsError::Forbidden {
                resource_id: resource_id.to_string(),
            });
        }

        let mut stored = permissions;
        stored.merge_defaults(&topic.defaults);
        topic
            .resources
            .insert(resource_id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn remove_resource(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
    ) -> Result<(), PermissionsError> {
        let mut state = self.state.lock().await;
        let caller = self.resolve(&state, token)?;
        let Some(topic) = state.topics.get_mut(topic_id) else {
            return Ok(());
        };
        let Some(existing) = topic.resources.get(resource_id) else {
            return Ok(());
        };
        if !caller.can(existing, Permission::Administrate) {
            return Err(PermissionsError::Forbidden {
                resource_id: resource_id.to_string(),
            });
        }
        topic.resources.remove(resource_id);
        Ok(())
    }
}

fn paginate<T>(items: impl Iterator<Item = T>, options: ListOptions) -> Vec<T> {
    let offset = usize::try_from(options.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let items = items.skip(offset);
    match options.limit {
        Some(limit) => items
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect(),
        None => items.collect(),
    }
}

fn strip_bearer(token: &str) -> &str {
    let trimmed = token.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
        _ => trimmed,
    }
}

// Signatures are not checked here; the in-memory service only needs the
// identity the token claims to carry.
fn principal_from_jwt(token: &str) -> Result<Principal, PermissionsError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|_| PermissionsError::Unauthorized)?;
    let claims = data.claims;
    if claims.sub.trim().is_empty() {
        return Err(PermissionsError::Unauthorized);
    }
    Ok(Principal {
        user_id: claims.sub,
        groups: claims.groups,
        roles: claims
            .realm_access
            .map(|access| access.roles)
            .unwrap_or_default(),
    })
}
