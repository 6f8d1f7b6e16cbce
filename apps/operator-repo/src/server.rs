use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::operators::query::QueryArgs;
use crate::operators::service::{OperatorError, OperatorService};
use crate::operators::types::{BatchDeleteReport, Caller, Operator, OperatorResponse};

const HEADER_USER_ID: &str = "x-userid";
const HEADER_USER_ROLES: &str = "x-user-roles";
const HEADER_API_VERSION: &str = "x-api-version";
const HEADER_SERVICE_NAME: &str = "x-service-name";
const ADMIN_ROLE: &str = "admin";

#[derive(Clone)]
pub struct AppState {
    config: Config,
    service: OperatorService,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, service: OperatorService) -> Self {
        Self { config, service }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IdentityQuery {
    for_user: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    // Health checks stay out of the request trace; `layer` only wraps routes added before it.
    let api = Router::new()
        .route(
            "/operator",
            get(list_operators)
                .put(create_operator)
                .delete(delete_operators),
        )
        .route("/operator/", put(create_operator))
        .route(
            "/operator/:id",
            get(get_operator)
                .post(update_operator)
                .delete(delete_operator),
        )
        .route("/operator/:id/", post(update_operator))
        .layer(TraceLayer::new_for_http())
        .route("/health-check", get(health_check));

    let prefix = state.config.url_prefix.clone();
    let routes = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix.as_str(), api)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
        .expose_headers([header::CONTENT_LENGTH]);
    let api_version = header_value(&state.config.version);
    let service_name = header_value(&state.config.service_name);
    let timeout = state.config.http_timeout;

    routes.with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(cors)
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(HEADER_API_VERSION),
                api_version,
            ))
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(HEADER_SERVICE_NAME),
                service_name,
            ))
            .layer(TimeoutLayer::new(timeout)),
    )
}

fn header_value(raw: &str) -> HeaderValue {
    HeaderValue::from_str(raw).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn list_operators(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<OperatorResponse>, ApiError> {
    let for_user = pairs
        .iter()
        .find(|(key, _)| key == "for_user")
        .map(|(_, value)| value.as_str());
    let caller = resolve_caller(&headers, for_user)?;
    let args = QueryArgs::from_pairs(
        pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str())),
    );
    Ok(Json(state.service.list(&caller, &args).await?))
}

async fn get_operator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(identity): Query<IdentityQuery>,
) -> Result<Json<Operator>, ApiError> {
    let caller = resolve_caller(&headers, identity.for_user.as_deref())?;
    Ok(Json(state.service.get(&id, &caller).await?))
}

async fn create_operator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(identity): Query<IdentityQuery>,
    payload: Result<Json<Operator>, JsonRejection>,
) -> Result<(StatusCode, Json<Operator>), ApiError> {
    let caller = resolve_caller(&headers, identity.for_user.as_deref())?;
    let Json(operator) = payload.map_err(|error| ApiError::InvalidBody(error.body_text()))?;
    let created = state.service.create(operator, &caller).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_operator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(identity): Query<IdentityQuery>,
    payload: Result<Json<Operator>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let caller = resolve_caller(&headers, identity.for_user.as_deref())?;
    let Json(operator) = payload.map_err(|error| ApiError::InvalidBody(error.body_text()))?;
    state.service.update(&id, operator, &caller).await?;
    Ok(StatusCode::OK)
}

async fn delete_operator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(identity): Query<IdentityQuery>,
) -> Result<StatusCode, ApiError> {
    let caller = resolve_caller(&headers, identity.for_user.as_deref())?;
    state.service.delete(&id, &caller).await?;
    Ok(StatusCode::OK)
}

async fn delete_operators(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(identity): Query<IdentityQuery>,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<BatchDeleteReport>, ApiError> {
    let caller = resolve_caller(&headers, identity.for_user.as_deref())?;
    let Json(ids) = payload.map_err(|error| ApiError::InvalidBody(error.body_text()))?;
    Ok(Json(state.service.delete_many(&ids, &caller).await?))
}

/// Admins may act on behalf of `for_user`; everyone else is `X-UserId`.
fn resolve_caller(headers: &HeaderMap, for_user: Option<&str>) -> Result<Caller, ApiError> {
    let auth_token = header_str(headers, header::AUTHORIZATION.as_str()).unwrap_or_default();

    if let Some(for_user) = for_user.map(str::trim).filter(|value| !value.is_empty()) {
        let is_admin = header_str(headers, HEADER_USER_ROLES)
            .is_some_and(|roles| roles.split(',').any(|role| role.trim() == ADMIN_ROLE));
        if is_admin {
            return Ok(Caller::new(for_user, auth_token));
        }
    }

    match header_str(headers, HEADER_USER_ID) {
        Some(user_id) => Ok(Caller::new(user_id, auth_token)),
        None => Err(ApiError::MissingIdentity),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug)]
enum ApiError {
    MissingIdentity,
    InvalidBody(String),
    Operator(OperatorError),
}

impl From<OperatorError> for ApiError {
    fn from(error: OperatorError) -> Self {
        Self::Operator(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            Self::MissingIdentity => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing x-userid header".to_string(),
            ),
            Self::InvalidBody(message) => (StatusCode::BAD_REQUEST, "invalid_request", message),
            Self::Operator(error) => {
                let status = match &error {
                    OperatorError::NotFound => StatusCode::NOT_FOUND,
                    OperatorError::Unauthorized(_) => StatusCode::FORBIDDEN,
                    OperatorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    OperatorError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    tracing::error!(reason = %error, "operator request failed on a dependency");
                } else {
                    tracing::debug!(reason = %error, "operator request rejected");
                }
                (status, error.code(), error.message())
            }
        };
        (
            status,
            Json(serde_json::json!({
                "error": code,
                "message": message,
            })),
        )
            .into_response()
    }
}
