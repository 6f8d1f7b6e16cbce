use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    ListOptions, Permission, PermissionsClient, PermissionsError, Resource, ResourcePermissions,
    Topic,
};

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct PermissionsClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl PermissionsClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpPermissionsClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpPermissionsClient {
    pub fn new(config: PermissionsClientConfig) -> Result<Self, PermissionsError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn topic_path(topic_id: &str) -> String {
        format!("/admin/topics/{}", topic_id.trim())
    }

    #[must_use]
    pub fn check_path(topic_id: &str, resource_id: &str, permission: Permission) -> String {
        format!(
            "/check/{}/{}?permissions={}",
            topic_id.trim(),
            resource_id.trim(),
            permission.code()
        )
    }

    #[must_use]
    pub fn accessible_path(topic_id: &str, options: ListOptions, permission: Permission) -> String {
        format!(
            "/accessible/{}?permissions={}{}",
            topic_id.trim(),
            permission.code(),
            list_options_query(options)
        )
    }

    #[must_use]
    pub fn manage_path(topic_id: &str, options: ListOptions) -> String {
        let query = list_options_query(options);
        match query.strip_prefix('&') {
            Some(query) => format!("/manage/{}?{query}", topic_id.trim()),
            None => format!("/manage/{}", topic_id.trim()),
        }
    }

    #[must_use]
    pub fn manage_resource_path(topic_id: &str, resource_id: &str) -> String {
        format!("/manage/{}/{}", topic_id.trim(), resource_id.trim())
    }

    #[must_use]
    pub fn remove_resource_path(topic_id: &str, resource_id: &str) -> String {
        format!(
            "/admin/topics/{}/resources/{}",
            topic_id.trim(),
            resource_id.trim()
        )
    }

    async fn send<Req>(
        &self,
        method: Method,
        path: &str,
        token: &str,
        payload: Option<&Req>,
    ) -> Result<reqwest::Response, PermissionsError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path).ok_or(PermissionsError::InvalidPath)?;
        tracing::debug!(method = %method, path, "permissions request");
        let mut request = self
            .http
            .request(method, url.as_str())
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .header("authorization", bearer(token))
            .timeout(self.timeout);
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        request
            .send()
            .await
            .map_err(|error| PermissionsError::Request {
                message: error.to_string(),
            })
    }
}

#[async_trait]
impl PermissionsClient for HttpPermissionsClient {
    async fn set_topic(&self, admin_token: &str, topic: Topic) -> Result<Topic, PermissionsError> {
        let response = self
            .send(
                Method::PUT,
                Self::topic_path(&topic.id).as_str(),
                admin_token,
                Some(&topic),
            )
            .await?;
        decode_json_response(response).await
    }

    async fn check_permission(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
        permission: Permission,
    ) -> Result<bool, PermissionsError> {
        let response = self
            .send::<()>(
                Method::GET,
                Self::check_path(topic_id, resource_id, permission).as_str(),
                token,
                None,
            )
            .await?;
        // Unknown resources answer 404, which is a plain "no".
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        decode_json_response(response).await
    }

    async fn list_accessible_resource_ids(
        &self,
        token: &str,
        topic_id: &str,
        options: ListOptions,
        permission: Permission,
    ) -> Result<Vec<String>, PermissionsError> {
        let response = self
            .send::<()>(
                Method::GET,
                Self::accessible_path(topic_id, options, permission).as_str(),
                token,
                None,
            )
            .await?;
        decode_json_response(response).await
    }

    async fn list_resources_with_admin_permission(
        &self,
        token: &str,
        topic_id: &str,
        options: ListOptions,
    ) -> Result<Vec<Resource>, PermissionsError> {
        let response = self
            .send::<()>(
                Method::GET,
                Self::manage_path(topic_id, options).as_str(),
                token,
                None,
            )
            .await?;
        decode_json_response(response).await
    }

    async fn set_permission(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
        permissions: ResourcePermissions,
    ) -> Result<ResourcePermissions, PermissionsError> {
        let response = self
            .send(
                Method::PUT,
                Self::manage_resource_path(topic_id, resource_id).as_str(),
                token,
                Some(&permissions),
            )
            .await?;
        decode_json_response(response).await
    }

    async fn remove_resource(
        &self,
        token: &str,
        topic_id: &str,
        resource_id: &str,
    ) -> Result<(), PermissionsError> {
        let response = self
            .send::<()>(
                Method::DELETE,
                Self::remove_resource_path(topic_id, resource_id).as_str(),
                token,
                None,
            )
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| PermissionsError::Read {
                message: error.to_string(),
            })?;
        Err(format_http_error(status, &bytes))
    }
}

pub(crate) fn bearer(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
    {
        trimmed.to_string()
    } else {
        format!("Bearer {trimmed}")
    }
}

fn list_options_query(options: ListOptions) -> String {
    let mut query = String::new();
    if let Some(limit) = options.limit {
        query.push_str(&format!("&limit={limit}"));
    }
    if let Some(offset) = options.offset {
        query.push_str(&format!("&offset={offset}"));
    }
    query
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> PermissionsError {
    if status == StatusCode::UNAUTHORIZED {
        return PermissionsError::Unauthorized;
    }
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    PermissionsError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, PermissionsError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(PermissionsError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, PermissionsError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| PermissionsError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| PermissionsError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use anyhow::Result;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{delete, get},
    };
    use tokio::net::TcpListener;

    use super::*;
    use crate::PermissionsMap;

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let client = HttpPermissionsClient::new(PermissionsClientConfig::new(
            "http://permv2.permissions:8080/",
        ))
        .expect("permissions client");

        assert_eq!(
            client.endpoint("/check/t/1?permissions=r"),
            Some("http://permv2.permissions:8080/check/t/1?permissions=r".to_string())
        );
        assert_eq!(
            client.endpoint("manage/t"),
            Some("http://permv2.permissions:8080/manage/t".to_string())
        );
        assert_eq!(client.endpoint(" "), None);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let error = HttpPermissionsClient::new(PermissionsClientConfig::new("  "))
            .expect_err("blank base url");
        assert!(matches!(error, PermissionsError::BaseUrlMissing));
    }

    #[test]
    fn path_helpers_are_deterministic() {
        assert_eq!(
            HttpPermissionsClient::topic_path("analytics-operators"),
            "/admin/topics/analytics-operators"
        );
        assert_eq!(
            HttpPermissionsClient::check_path("analytics-operators", "op-1", Permission::Write),
            "/check/analytics-operators/op-1?permissions=w"
        );
        assert_eq!(
            HttpPermissionsClient::accessible_path(
                "analytics-operators",
                ListOptions::default(),
                Permission::Read
            ),
            "/accessible/analytics-operators?permissions=r"
        );
        assert_eq!(
            HttpPermissionsClient::accessible_path(
                "analytics-operators",
                ListOptions {
                    limit: Some(10),
                    offset: Some(20),
                },
                Permission::Read
            ),
            "/accessible/analytics-operators?permissions=r&limit=10&offset=20"
        );
        assert_eq!(
            HttpPermissionsClient::manage_path("analytics-operators", ListOptions::default()),
            "/manage/analytics-operators"
        );
        assert_eq!(
            HttpPermissionsClient::manage_path(
                "analytics-operators",
                ListOptions {
                    limit: Some(5),
                    offset: None,
                }
            ),
            "/manage/analytics-operators?limit=5"
        );
        assert_eq!(
            HttpPermissionsClient::manage_resource_path("analytics-operators", "op-1"),
            "/manage/analytics-operators/op-1"
        );
        assert_eq!(
            HttpPermissionsClient::remove_resource_path("analytics-operators", "op-1"),
            "/admin/topics/analytics-operators/resources/op-1"
        );
    }

    #[test]
    fn bearer_prefix_is_added_once() {
        assert_eq!(bearer("abc"), "Bearer abc");
        assert_eq!(bearer("Bearer abc"), "Bearer abc");
        assert_eq!(bearer("bearer abc"), "bearer abc");
    }

    async fn spawn_stub() -> Result<SocketAddr> {
        let app = Router::new()
            .route(
                "/check/:topic/:id",
                get(|Path((_topic, id)): Path<(String, String)>, headers: HeaderMap| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        == Some("Bearer token-u1");
                    if id == "missing" {
                        return (StatusCode::NOT_FOUND, Json(serde_json::json!("not found")));
                    }
                    (StatusCode::OK, Json(serde_json::json!(authorized)))
                }),
            )
            .route(
                "/manage/:topic",
                get(|| async {
                    Json(serde_json::json!([{
                        "id": "op-1",
                        "topic_id": "analytics-operators",
                        "user_permissions": {"u1": {"read": true, "write": true, "execute": true, "administrate": true}},
                        "group_permissions": {},
                        "role_permissions": {}
                    }]))
                }),
            )
            .route(
                "/admin/topics/:topic/resources/:id",
                delete(|Path((_topic, id)): Path<(String, String)>| async move {
                    if id == "broken" {
                        (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                    } else {
                        (StatusCode::NO_CONTENT, "")
                    }
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(addr)
    }

    #[tokio::test]
    async fn http_client_maps_service_responses() -> Result<()> {
        let addr = spawn_stub().await?;
        let client =
            HttpPermissionsClient::new(PermissionsClientConfig::new(format!("http://{addr}")))?;

        assert!(
            client
                .check_permission("token-u1", "analytics-operators", "op-1", Permission::Read)
                .await?
        );
        assert!(
            !client
                .check_permission("token-u2", "analytics-operators", "op-1", Permission::Read)
                .await?
        );
        assert!(
            !client
                .check_permission("token-u1", "analytics-operators", "missing", Permission::Read)
                .await?
        );

        let resources = client
            .list_resources_with_admin_permission(
                "admin",
                "analytics-operators",
                ListOptions::default(),
            )
            .await?;
        assert_eq!(resources.len(), 1);
        assert_eq!(
            resources[0].permissions.user_permissions.get("u1"),
            Some(&PermissionsMap::full())
        );

        client
            .remove_resource("admin", "analytics-operators", "op-1")
            .await?;
        let error = client
            .remove_resource("admin", "analytics-operators", "broken")
            .await
            .expect_err("server error surfaces");
        assert!(matches!(
            error,
            PermissionsError::Http { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        Ok(())
    }
}
