use crate::dispatch::{self, RenderRequest, sanitize_header_value};
use crate::mode::Mode;
use crate::registry::RequestContext;
use crate::state::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics_text))
        .route("/api/v1/providers", get(list_providers))
        .route("/api/v1/render", get(render_default))
        .route("/api/v1/render/{providers}", get(render_filtered))
        .route("/api/v1/render/{providers}/{raw}", get(render_raw))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "providers": state.registry.len(),
        "browser_session_reuse": state.config.use_browser_sessions,
    }))
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

#[derive(Debug, Serialize)]
struct ProviderInfo {
    name: &'static str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ProviderListing {
    providers: Vec<ProviderInfo>,
}

/// Visible providers only; hidden entries stay selectable but are not
/// advertised.
async fn list_providers(State(state): State<Arc<AppState>>) -> Json<ProviderListing> {
    let providers = state
        .registry
        .keys(false)
        .into_iter()
        .filter_map(|key| state.registry.lookup(key))
        .map(|descriptor| ProviderInfo {
            name: descriptor.key,
            kind: descriptor.spec.kind(),
            description: descriptor.description,
        })
        .collect();
    Json(ProviderListing { providers })
}

async fn render_default(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle_render(state, None, None, query, headers).await
}

async fn render_filtered(
    State(state): State<Arc<AppState>>,
    Path(providers): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle_render(state, Some(providers), None, query, headers).await
}

async fn render_raw(
    State(state): State<Arc<AppState>>,
    Path((providers, raw)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle_render(state, Some(providers), Some(raw), query, headers).await
}

async fn handle_render(
    state: Arc<AppState>,
    filter: Option<String>,
    raw_segment: Option<String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
) -> Response {
    let raw = raw_segment.as_deref() == Some("raw");
    let json = query
        .get("json")
        .map(|value| value == "true")
        .unwrap_or(false);
    let mode = Mode::resolve(&query);
    let ctx = RequestContext {
        origin: request_origin(&state, &headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        params: query,
        config: state.config.clone(),
    };
    dispatch::run(
        state,
        RenderRequest {
            filter,
            raw,
            json,
            mode,
            ctx,
        },
    )
    .await
}

fn request_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(origin) = state.config.public_origin.as_ref() {
        return origin.clone();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

/// Basic auth for the API surface, fed by the `USERS` config map. Skipped
/// wholesale in development.
pub async fn auth_middleware(state: Arc<AppState>, request: Request, next: Next) -> Response {
    if state.config.development || state.config.skip_auth {
        return next.run(request).await;
    }
    if !request.uri().path().starts_with("/api/") {
        return next.run(request).await;
    }
    if state.config.users.is_empty() {
        return (StatusCode::OK, "Users not found.").into_response();
    }
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| check_basic_credentials(value, &state.config.users))
        .unwrap_or(false);
    if !authorized {
        return ApiError::unauthorized().into_response();
    }
    next.run(request).await
}

fn check_basic_credentials(header_value: &str, users: &HashMap<String, String>) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((username, password)) = credentials.split_once(':') else {
        return false;
    };
    users.get(username).map(String::as_str) == Some(password)
}

/// Request accounting by coarse route group.
pub async fn track_requests(state: Arc<AppState>, request: Request, next: Next) -> Response {
    let route_group = route_group(request.uri().path());
    let response = next.run(request).await;
    state.metrics.request(route_group, response.status().as_u16());
    response
}

fn route_group(path: &str) -> &'static str {
    if path.starts_with("/api/v1/render") {
        "render"
    } else if path.starts_with("/api/v1/providers") {
        "providers"
    } else if path == "/metrics" {
        "metrics"
    } else if path == "/healthz" || path == "/status" {
        "health"
    } else {
        "other"
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        ApiError {
            status,
            message: message.to_string(),
            headers: HeaderMap::new(),
        }
    }

    pub fn unauthorized() -> Self {
        let mut error = ApiError::new(StatusCode::UNAUTHORIZED, "access denied");
        error.headers.insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"inky-gateway\""),
        );
        error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": { "message": self.message } }));
        let mut response = (self.status, body).into_response();
        response.headers_mut().extend(self.headers);
        let sanitized = sanitize_header_value(&self.message);
        if let Ok(value) = HeaderValue::from_str(&sanitized) {
            response.headers_mut().insert("X-Gateway-Error", value);
        }
        if self.status.is_server_error() {
            warn!(status = %self.status, message = %self.message, "request failed");
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> HashMap<String, String> {
        HashMap::from([("frame".to_string(), "hunter2".to_string())])
    }

    fn basic(credentials: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    #[test]
    fn valid_credentials_pass() {
        assert!(check_basic_credentials(&basic("frame:hunter2"), &users()));
    }

    #[test]
    fn wrong_password_and_scheme_fail() {
        assert!(!check_basic_credentials(&basic("frame:wrong"), &users()));
        assert!(!check_basic_credentials("Bearer token", &users()));
        assert!(!check_basic_credentials("Basic %%%", &users()));
        assert!(!check_basic_credentials(&basic("no-colon"), &users()));
    }

    #[test]
    fn route_groups_classify_paths() {
        assert_eq!(route_group("/api/v1/render/nasa"), "render");
        assert_eq!(route_group("/api/v1/render"), "render");
        assert_eq!(route_group("/api/v1/providers"), "providers");
        assert_eq!(route_group("/healthz"), "health");
        assert_eq!(route_group("/favicon.ico"), "other");
    }

    #[test]
    fn unauthorized_carries_challenge_and_json_body() {
        let response = ApiError::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(
            response.headers().get("X-Gateway-Error").unwrap(),
            "access denied"
        );
    }
}
