use crate::config::Config;
use crate::fetch::{FetchError, Fetcher};
use crate::mode::{FitMode, Mode};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// Structured payload returned by a provider's data-acquisition step. The
/// shape is provider-specific; the dispatch engine only probes it
/// defensively.
pub type UpstreamData = serde_json::Value;

/// Per-request inputs available to provider capabilities.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Origin of the incoming request, used to absolutize root-relative URLs
    /// in injected markup.
    pub origin: String,
    /// Raw query parameters, passed through to providers (e.g. `section`).
    pub params: HashMap<String, String>,
    pub user_agent: Option<String>,
    pub config: Arc<Config>,
}

pub type EndpointFn = fn(&Mode, &RequestContext) -> Url;
pub type ApiHeaderFn = fn(&RequestContext) -> Vec<(String, String)>;
pub type ResponseHeaderFn = fn(&UpstreamData, &Mode) -> Vec<(String, String)>;
pub type ImageUrlFn = fn(&UpstreamData, &Mode, &RequestContext) -> Url;
pub type MarkupFn = fn(&UpstreamData, &Mode, &RequestContext) -> String;
pub type TargetUrlFn = fn(&Mode, &RequestContext) -> Url;
pub type ScreenshotOptionsFn = fn(&Mode, &RequestContext) -> ScreenshotOptions;
pub type CustomFetchFn = for<'a> fn(
    &'a Fetcher,
    &'a Mode,
    &'a RequestContext,
) -> Pin<Box<dyn Future<Output = Result<UpstreamData, FetchError>> + Send + 'a>>;

/// How a provider acquires its structured data, if it needs any.
pub enum DataAcquisition {
    /// A single JSON GET against a provider-built endpoint.
    Endpoint(EndpointFn),
    /// A provider-owned routine that performs its own sequence of calls.
    Custom(CustomFetchFn),
}

#[derive(Debug, Clone, Copy)]
pub struct ScreenshotOptions {
    pub quality: u32,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        ScreenshotOptions { quality: 100 }
    }
}

/// Element to screenshot inside a rendered or remote page. A selector miss
/// at capture time degrades to a whole-page screenshot, so the static forms
/// cover every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The whole page.
    Page,
    /// The default content container.
    Container,
    Css(&'static str),
}

pub const DEFAULT_TARGET_SELECTOR: &str = ".container";

impl Target {
    pub fn selector(&self) -> Option<String> {
        match self {
            Target::Page => None,
            Target::Container => Some(DEFAULT_TARGET_SELECTOR.to_string()),
            Target::Css(selector) => Some((*selector).to_string()),
        }
    }
}

/// Kind-specific capabilities. Each concrete kind carries the capabilities it
/// requires; aliases carry only their redirect target.
pub enum ProviderSpec {
    Image {
        image_url: ImageUrlFn,
        response_headers: ResponseHeaderFn,
        /// Provider-forced fit, overriding the request's `fit` parameter.
        fit: Option<FitMode>,
    },
    Render {
        markup: MarkupFn,
        target: Target,
        response_headers: Option<ResponseHeaderFn>,
        options: Option<ScreenshotOptionsFn>,
    },
    Remote {
        target_url: TargetUrlFn,
        target: Target,
        options: Option<ScreenshotOptionsFn>,
    },
    Alias {
        target: &'static str,
    },
}

impl ProviderSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderSpec::Image { .. } => "image",
            ProviderSpec::Render { .. } => "render",
            ProviderSpec::Remote { .. } => "remote",
            ProviderSpec::Alias { .. } => "alias",
        }
    }
}

pub struct ProviderDescriptor {
    pub key: &'static str,
    pub description: Option<&'static str>,
    /// Hidden providers are omitted from listings but stay selectable by
    /// explicit filter.
    pub hidden: bool,
    /// Number of margin bands this provider reserves out of the content
    /// height (one per banner row it overlays).
    pub margin_offset: u32,
    pub data: Option<DataAcquisition>,
    pub api_headers: Option<ApiHeaderFn>,
    pub spec: ProviderSpec,
}

/// Read-only catalog of every configured provider, built once at startup.
pub struct Registry {
    entries: BTreeMap<&'static str, ProviderDescriptor>,
}

impl Registry {
    pub fn new(entries: Vec<ProviderDescriptor>) -> Self {
        let entries = entries
            .into_iter()
            .map(|descriptor| (descriptor.key, descriptor))
            .collect();
        Registry { entries }
    }

    pub fn with_defaults() -> Self {
        Registry::new(crate::providers::catalog())
    }

    pub fn lookup(&self, key: &str) -> Option<&ProviderDescriptor> {
        self.entries.get(key)
    }

    /// Resolve a key to a concrete descriptor, following at most one alias
    /// hop. An alias pointing at a missing key, or at another alias, resolves
    /// to absence rather than an error.
    pub fn resolve(&self, key: &str) -> Option<&ProviderDescriptor> {
        let descriptor = self.entries.get(key)?;
        match descriptor.spec {
            ProviderSpec::Alias { target } => {
                let resolved = self.entries.get(target)?;
                if matches!(resolved.spec, ProviderSpec::Alias { .. }) {
                    return None;
                }
                Some(resolved)
            }
            _ => Some(descriptor),
        }
    }

    pub fn keys(&self, include_hidden: bool) -> Vec<&'static str> {
        self.entries
            .values()
            .filter(|descriptor| include_hidden || !descriptor.hidden)
            .map(|descriptor| descriptor.key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick one candidate uniformly at random. With a filter expression the
    /// candidates are its verbatim tokens, whether or not they name a real
    /// provider; without one, every registry key (hidden included) is
    /// eligible.
    pub fn select<R: Rng>(&self, filter: Option<&str>, rng: &mut R) -> Option<String> {
        match filter {
            Some(expression) => pick_one(&split_filter(expression), rng),
            None => pick_one(&self.keys(true), rng),
        }
    }
}

/// Split a provider filter on runs of pipe, comma, or whitespace.
pub fn split_filter(expression: &str) -> Vec<&str> {
    expression
        .split(|ch: char| ch == '|' || ch == ',' || ch.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect()
}

fn pick_one<R: Rng, S: AsRef<str>>(candidates: &[S], rng: &mut R) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let index = rng.gen_range(0..candidates.len());
    Some(candidates[index].as_ref().to_string())
}
