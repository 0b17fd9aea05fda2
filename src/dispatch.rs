use crate::fallback;
use crate::fetch::{FetchError, RetryPolicy};
use crate::markup;
use crate::mode::Mode;
use crate::registry::{
    DataAcquisition, ProviderDescriptor, ProviderSpec, RequestContext, ScreenshotOptions,
    UpstreamData,
};
use crate::state::AppState;
use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use url::Url;

pub const HEADER_IMAGE_SIZE: &str = "X-Image-Size";
pub const HEADER_IMAGE_SOURCE: &str = "X-Image-Source";
pub const HEADER_IMAGE_PROVIDER: &str = "X-Image-Provider";
pub const HEADER_INVALID_PROVIDER: &str = "X-Invalid-Provider";

/// A fully assembled image response: JPEG bytes plus the descriptive header
/// set. Built once per request and streamed straight to the client.
pub struct RenderedAsset {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for RenderedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedAsset")
            .field("bytes", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .finish()
    }
}

impl RenderedAsset {
    pub fn jpeg(bytes: Vec<u8>, headers: Vec<(String, String)>) -> Self {
        RenderedAsset {
            bytes,
            content_type: mime::IMAGE_JPEG.essence_str(),
            headers,
        }
    }

    pub fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(self.content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        for (name, value) in &self.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            if let Ok(value) = HeaderValue::from_str(&sanitize_header_value(value)) {
                headers.insert(name, value);
            }
        }
        (StatusCode::OK, headers, self.bytes).into_response()
    }
}

/// Header values come from upstream payloads; strip anything a header can't
/// carry rather than failing the response over a fancy title.
pub fn sanitize_header_value(value: &str) -> String {
    let mut sanitized: String = value
        .chars()
        .filter(|ch| ch.is_ascii() && !ch.is_control())
        .collect();
    sanitized.truncate(200);
    sanitized
}

pub struct RenderRequest {
    pub filter: Option<String>,
    pub raw: bool,
    pub json: bool,
    pub mode: Mode,
    pub ctx: RequestContext,
}

/// Per-request pipeline: select a provider, fetch its data, execute the
/// branch for its kind, and always hand the client an image. The only
/// caller-visible errors are an upstream data failure (500) and an
/// unreachable placeholder (502).
pub async fn run(state: Arc<AppState>, request: RenderRequest) -> Response {
    let RenderRequest {
        filter,
        raw,
        json,
        mode,
        ctx,
    } = request;

    let chosen = {
        let mut rng = rand::thread_rng();
        state.registry.select(filter.as_deref(), &mut rng)
    };
    let Some(chosen) = chosen else {
        return fallback_response(&state, &mode, "").await;
    };

    let Some(descriptor) = state.registry.resolve(&chosen) else {
        warn!(provider = %chosen, "unknown or unresolvable provider");
        state.metrics.fallback("unknown_provider");
        return fallback_response(&state, &mode, &chosen).await;
    };
    state
        .metrics
        .selection(descriptor.key, descriptor.spec.kind());

    // Reserve banner space before any fetch; upstream aspect parameters
    // depend on the adjusted height.
    let mut mode = mode;
    mode.apply_margin_offset(descriptor.margin_offset);

    // The data-fetch gate: failures here are loud (a misbehaving provider
    // API should be visible to the caller), unlike everything after it.
    let data = match fetch_data(&state, descriptor, &mode, &ctx).await {
        Ok(data) => data,
        Err(err) => {
            warn!(provider = %chosen, error = %err, "upstream data fetch failed");
            state.metrics.upstream_failure(descriptor.key);
            return upstream_error_response(&err);
        }
    };

    if raw {
        if let Some(data) = data.as_ref() {
            return raw_response(descriptor, data, &mode, &ctx, json);
        }
    }

    let data = data.unwrap_or(Value::Null);
    let started = Instant::now();
    let branch = descriptor.spec.kind();
    let outcome = tokio::time::timeout(
        state.config.request_deadline,
        execute_branch(&state, descriptor, &chosen, &data, &mode, &ctx),
    )
    .await;
    state
        .metrics
        .observe_capture(branch, started.elapsed().as_secs_f64());
    match outcome {
        Ok(Ok(asset)) => {
            state.metrics.result("success");
            asset.into_response()
        }
        Ok(Err(err)) => {
            warn!(provider = %chosen, error = ?err, "render failed; serving fallback");
            state.metrics.fallback("render_failure");
            fallback_response(&state, &mode, &chosen).await
        }
        Err(_) => {
            warn!(provider = %chosen, "render deadline exceeded; serving fallback");
            state.metrics.fallback("deadline");
            fallback_response(&state, &mode, &chosen).await
        }
    }
}

async fn fetch_data(
    state: &AppState,
    descriptor: &ProviderDescriptor,
    mode: &Mode,
    ctx: &RequestContext,
) -> Result<Option<UpstreamData>, FetchError> {
    let Some(acquisition) = descriptor.data.as_ref() else {
        return Ok(None);
    };
    let data = match acquisition {
        DataAcquisition::Endpoint(endpoint) => {
            let url = endpoint(mode, ctx);
            let headers = api_headers(descriptor, ctx);
            state
                .fetcher
                .get_json(&url, &headers, &RetryPolicy::http())
                .await?
        }
        DataAcquisition::Custom(fetcher) => fetcher(&state.fetcher, mode, ctx).await?,
    };
    Ok(Some(data))
}

fn api_headers(descriptor: &ProviderDescriptor, ctx: &RequestContext) -> Vec<(String, String)> {
    let mut headers = descriptor
        .api_headers
        .map(|build| build(ctx))
        .unwrap_or_default();
    if let Some(user_agent) = ctx.user_agent.as_ref() {
        headers.push(("User-Agent".to_string(), user_agent.clone()));
    }
    headers
}

/// Raw passthrough: the provider's structured data as JSON, or its markup as
/// HTML for render providers unless the caller forces JSON.
fn raw_response(
    descriptor: &ProviderDescriptor,
    data: &UpstreamData,
    mode: &Mode,
    ctx: &RequestContext,
    force_json: bool,
) -> Response {
    if let ProviderSpec::Render { markup, .. } = &descriptor.spec {
        if !force_json {
            return Html(markup(data, mode, ctx)).into_response();
        }
    }
    Json(data.clone()).into_response()
}

async fn execute_branch(
    state: &AppState,
    descriptor: &ProviderDescriptor,
    chosen: &str,
    data: &UpstreamData,
    mode: &Mode,
    ctx: &RequestContext,
) -> anyhow::Result<RenderedAsset> {
    match &descriptor.spec {
        ProviderSpec::Image {
            image_url,
            response_headers,
            fit,
        } => {
            let source = image_url(data, mode, ctx);
            let banner_headers = response_headers(data, mode);
            let spec = crate::transform::build(mode, &banner_headers, *fit);
            let bytes = state
                .fetcher
                .get_bytes(&source, &api_headers(descriptor, ctx))
                .await?;
            let bytes = crate::transform::apply(&spec, &bytes)?;
            let mut headers = standard_headers(mode, chosen);
            headers.push((HEADER_IMAGE_SOURCE.to_string(), source.to_string()));
            headers.extend(banner_headers);
            Ok(RenderedAsset::jpeg(bytes, headers))
        }
        ProviderSpec::Render {
            markup: build_markup,
            target,
            response_headers,
            options,
        } => {
            let page = build_markup(data, mode, ctx);
            let page = markup::absolutize(&page, &ctx.origin);
            let selector = target.selector();
            let quality = screenshot_quality(*options, mode, ctx);
            let pool = state.browser.clone();
            let capture_mode = mode.clone();
            let bytes = tokio::task::spawn_blocking(move || {
                pool.capture_markup(&page, &capture_mode, selector, quality)
            })
            .await??;
            let mut headers = standard_headers(mode, chosen);
            if let Some(response_headers) = response_headers {
                headers.extend(response_headers(data, mode));
            }
            Ok(RenderedAsset::jpeg(bytes, headers))
        }
        ProviderSpec::Remote {
            target_url,
            target,
            options,
        } => {
            let url: Url = target_url(mode, ctx);
            let selector = target.selector();
            let quality = screenshot_quality(*options, mode, ctx);
            let pool = state.browser.clone();
            let capture_mode = mode.clone();
            let bytes = tokio::task::spawn_blocking(move || {
                pool.capture_url(url.as_str(), &capture_mode, selector, quality)
            })
            .await??;
            Ok(RenderedAsset::jpeg(bytes, standard_headers(mode, chosen)))
        }
        ProviderSpec::Alias { .. } => anyhow::bail!("alias reached the dispatch branch"),
    }
}

fn screenshot_quality(
    options: Option<crate::registry::ScreenshotOptionsFn>,
    mode: &Mode,
    ctx: &RequestContext,
) -> u32 {
    options
        .map(|build| build(mode, ctx))
        .unwrap_or_else(ScreenshotOptions::default)
        .quality
}

fn standard_headers(mode: &Mode, chosen: &str) -> Vec<(String, String)> {
    vec![
        (HEADER_IMAGE_SIZE.to_string(), mode.size_label()),
        (HEADER_IMAGE_PROVIDER.to_string(), chosen.to_string()),
    ]
}

fn upstream_error_response(err: &FetchError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": { "message": err.to_string() } })),
    )
        .into_response()
}

async fn fallback_response(state: &AppState, mode: &Mode, attempted: &str) -> Response {
    match fallback::supply(&state.fetcher, &state.config, mode, attempted).await {
        Ok(asset) => {
            state.metrics.result("fallback");
            asset.into_response()
        }
        Err(err) => {
            error!(error = %err, "placeholder source unreachable");
            state.metrics.result("fallback_unavailable");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": { "message": "placeholder image unavailable" } })),
            )
                .into_response()
        }
    }
}
