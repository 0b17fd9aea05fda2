use crate::config::Config;
use crate::dispatch::{
    HEADER_IMAGE_PROVIDER, HEADER_IMAGE_SIZE, HEADER_IMAGE_SOURCE, HEADER_INVALID_PROVIDER,
    RenderedAsset,
};
use crate::fetch::{FetchError, Fetcher};
use crate::mode::Mode;
use crate::transform::{self, TransformError};
use thiserror::Error;
use url::Url;

/// Provider name reported when the generic placeholder is served.
pub const FALLBACK_PROVIDER: &str = "Lorem Picsum";

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("placeholder fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("placeholder transform failed: {0}")]
    Transform(#[from] TransformError),
}

/// Generic placeholder sized to the request; also used by image providers
/// as the image-of-last-resort when upstream data is malformed.
pub fn placeholder_url(mode: &Mode, config: &Config) -> Url {
    let base = config.fallback_image_base.trim_end_matches('/');
    let raw = format!("{base}/{}/{}/?blur=5&grayscale", mode.width, mode.height);
    Url::parse(&raw).unwrap_or_else(|_| {
        Url::parse("https://picsum.photos/1200/825/?blur=5&grayscale").expect("static url")
    })
}

/// Produce the placeholder response, tagged with the provider key that led
/// here. The placeholder source is the one dependency without a net under
/// it; an unreachable source propagates.
pub async fn supply(
    fetcher: &Fetcher,
    config: &Config,
    mode: &Mode,
    attempted: &str,
) -> Result<RenderedAsset, FallbackError> {
    let source = placeholder_url(mode, config);
    let bytes = fetcher.get_bytes(&source, &[]).await?;
    let spec = transform::build(mode, &[], None);
    let bytes = transform::apply(&spec, &bytes)?;
    Ok(RenderedAsset::jpeg(
        bytes,
        vec![
            (HEADER_IMAGE_SIZE.to_string(), mode.size_label()),
            (HEADER_IMAGE_SOURCE.to_string(), source.to_string()),
            (HEADER_IMAGE_PROVIDER.to_string(), FALLBACK_PROVIDER.to_string()),
            (HEADER_INVALID_PROVIDER.to_string(), attempted.to_string()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_url_encodes_geometry() {
        let config = Config::for_tests();
        let mode = Mode {
            width: 600,
            height: 448,
            margin_band: 0,
            fit: None,
        };
        let url = placeholder_url(&mode, &config);
        assert_eq!(url.path(), "/600/448/");
        assert_eq!(url.query(), Some("blur=5&grayscale"));
    }

    #[test]
    fn malformed_base_falls_back_to_default_host() {
        let mut config = Config::for_tests();
        config.fallback_image_base = "not a url".to_string();
        let mode = Mode {
            width: 10,
            height: 10,
            margin_band: 0,
            fit: None,
        };
        let url = placeholder_url(&mode, &config);
        assert_eq!(url.host_str(), Some("picsum.photos"));
    }
}
