mod browser;
mod config;
mod dispatch;
mod fallback;
mod fetch;
mod http;
mod markup;
mod metrics;
mod mode;
mod providers;
mod rawg;
mod registry;
mod state;
mod transform;

use crate::config::Config;
use crate::state::AppState;
use axum::Router;
use axum::body::HttpBody;
use axum::http::{Response, header};
use axum::middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::{
    CompressionLayer,
    predicate::{DefaultPredicate, Predicate},
};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{info, warn};

/// Image payloads are already JPEG-compressed; re-compressing them wastes
/// CPU on every response.
#[derive(Clone)]
struct NoImageCompression {
    inner: DefaultPredicate,
}

impl NoImageCompression {
    fn new() -> Self {
        Self {
            inner: DefaultPredicate::new(),
        }
    }
}

impl Predicate for NoImageCompression {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            if let Ok(content_type) = content_type.to_str() {
                if content_type.starts_with("image/") {
                    return false;
                }
            }
        }
        self.inner.should_compress(response)
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    let max_in_flight = if state.config.max_in_flight_requests == 0 {
        usize::MAX
    } else {
        state.config.max_in_flight_requests
    };
    let auth_state = state.clone();
    let metrics_state = state.clone();
    http::router(state)
        .layer(CompressionLayer::new().compress_when(NoImageCompression::new()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION]))
        .layer(middleware::from_fn(move |request, next| {
            let state = auth_state.clone();
            async move { http::auth_middleware(state, request, next).await }
        }))
        .layer(middleware::from_fn(move |request, next| {
            let state = metrics_state.clone();
            async move { http::track_requests(state, request, next).await }
        }))
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    if config.development {
        warn!("development mode: basic auth disabled");
    }
    let state = Arc::new(AppState::new(config)?);
    if state.registry.is_empty() {
        warn!("provider registry is empty; every request will serve the fallback image");
    }
    info!(
        providers = state.registry.len(),
        browser_session_reuse = state.config.use_browser_sessions,
        request_deadline_seconds = state.config.request_deadline.as_secs(),
        max_in_flight = state.config.max_in_flight_requests,
        "startup config summary"
    );

    let app = build_app(state.clone());
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
