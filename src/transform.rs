use crate::mode::{FitMode, Mode};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgba, RgbaImage, imageops};
use std::io::Cursor;
use thiserror::Error;

pub const BANNER_TOP_HEADER: &str = "X-Inky-Message-0";
pub const BANNER_BOTTOM_HEADER: &str = "X-Inky-Message-2";

/// White keeps the margin bands clean on e-ink panels.
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const JPEG_QUALITY: u8 = 90;

/// Resize/pad/border parameters for the final image. A structural
/// description only; `apply` realizes it against actual bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSpec {
    pub width: u32,
    pub height: u32,
    pub fit: FitMode,
    pub border_top: u32,
    pub border_bottom: u32,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("image read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("zero-sized canvas")]
    EmptyCanvas,
}

/// Compute the transform for a request. Border bands are reserved only for
/// the banner headers actually present; `cover` gives the bands their space
/// back by shrinking the content height, every other fit keeps the canvas
/// as requested.
pub fn build(
    mode: &Mode,
    response_headers: &[(String, String)],
    fit_override: Option<FitMode>,
) -> TransformSpec {
    let fit = fit_override.or(mode.fit).unwrap_or(FitMode::Pad);
    let (border_top, border_bottom) = if mode.margin_band > 0 {
        (
            band_if_present(response_headers, BANNER_TOP_HEADER, mode.margin_band),
            band_if_present(response_headers, BANNER_BOTTOM_HEADER, mode.margin_band),
        )
    } else {
        (0, 0)
    };
    let height = if fit == FitMode::Cover {
        mode.height.saturating_sub(border_top + border_bottom)
    } else {
        mode.height
    };
    TransformSpec {
        width: mode.width,
        height,
        fit,
        border_top,
        border_bottom,
    }
}

fn band_if_present(headers: &[(String, String)], name: &str, band: u32) -> u32 {
    if headers.iter().any(|(header, _)| header == name) {
        band
    } else {
        0
    }
}

/// Realize a transform: decode, resize per fit mode onto a white canvas,
/// overlay the reserved banner bands, and re-encode as baseline JPEG.
pub fn apply(spec: &TransformSpec, bytes: &[u8]) -> Result<Vec<u8>, TransformError> {
    if spec.width == 0 || spec.height == 0 {
        return Err(TransformError::EmptyCanvas);
    }
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    let content = fit_content(&decoded, spec);
    let framed = frame_with_bands(content, spec);
    encode_jpeg(framed)
}

fn fit_content(decoded: &DynamicImage, spec: &TransformSpec) -> RgbaImage {
    match spec.fit {
        FitMode::Cover => decoded
            .resize_to_fill(spec.width, spec.height, FilterType::Lanczos3)
            .to_rgba8(),
        FitMode::Contain => decoded
            .resize(spec.width, spec.height, FilterType::Lanczos3)
            .to_rgba8(),
        FitMode::ScaleDown => {
            if decoded.width() <= spec.width && decoded.height() <= spec.height {
                decoded.to_rgba8()
            } else {
                decoded
                    .resize(spec.width, spec.height, FilterType::Lanczos3)
                    .to_rgba8()
            }
        }
        FitMode::Pad => pad_onto_canvas(decoded, spec, true),
        FitMode::Fillmax => pad_onto_canvas(decoded, spec, false),
    }
}

/// Center the (possibly resized) content on a background-filled canvas of
/// the exact requested size. `enlarge` distinguishes pad (scale both ways)
/// from fillmax (never scale up past the source).
fn pad_onto_canvas(decoded: &DynamicImage, spec: &TransformSpec, enlarge: bool) -> RgbaImage {
    let needs_resize =
        enlarge || decoded.width() > spec.width || decoded.height() > spec.height;
    let content = if needs_resize {
        decoded.resize(spec.width, spec.height, FilterType::Lanczos3)
    } else {
        decoded.clone()
    };
    let mut canvas = RgbaImage::from_pixel(spec.width, spec.height, BACKGROUND);
    let x = (spec.width.saturating_sub(content.width()) / 2) as i64;
    let y = (spec.height.saturating_sub(content.height()) / 2) as i64;
    imageops::overlay(&mut canvas, &content.to_rgba8(), x, y);
    canvas
}

fn frame_with_bands(content: RgbaImage, spec: &TransformSpec) -> RgbaImage {
    let bands = spec.border_top + spec.border_bottom;
    if bands == 0 {
        return content;
    }
    if spec.fit == FitMode::Cover {
        // Content height was already reduced; give the bands their own rows.
        let (width, height) = content.dimensions();
        let mut framed = RgbaImage::from_pixel(width, height + bands, BACKGROUND);
        imageops::overlay(&mut framed, &content, 0, spec.border_top as i64);
        framed
    } else {
        let mut framed = content;
        let height = framed.height();
        paint_band(&mut framed, 0, spec.border_top.min(height));
        let bottom_rows = spec.border_bottom.min(height);
        paint_band(&mut framed, height - bottom_rows, bottom_rows);
        framed
    }
}

fn paint_band(image: &mut RgbaImage, start_row: u32, rows: u32) {
    for y in start_row..start_row + rows {
        for x in 0..image.width() {
            image.put_pixel(x, y, BACKGROUND);
        }
    }
}

fn encode_jpeg(image: RgbaImage) -> Result<Vec<u8>, TransformError> {
    let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ColorType::Rgb8.into(),
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn mode(width: u32, height: u32, margin_band: u32, fit: Option<FitMode>) -> Mode {
        Mode {
            width,
            height,
            margin_band,
            fit,
        }
    }

    fn headers(names: &[&str]) -> Vec<(String, String)> {
        names
            .iter()
            .map(|name| (name.to_string(), "banner".to_string()))
            .collect()
    }

    #[test]
    fn cover_subtracts_present_bands_from_height() {
        let spec = build(
            &mode(1200, 825, 40, Some(FitMode::Cover)),
            &headers(&[BANNER_BOTTOM_HEADER]),
            None,
        );
        assert_eq!(spec.border_top, 0);
        assert_eq!(spec.border_bottom, 40);
        assert_eq!(spec.height, 785);
    }

    #[test]
    fn pad_reserves_bands_without_shrinking() {
        let spec = build(
            &mode(1200, 825, 40, Some(FitMode::Pad)),
            &headers(&[BANNER_BOTTOM_HEADER]),
            None,
        );
        assert_eq!(spec.height, 825);
        assert_eq!(spec.border_bottom, 40);
    }

    #[test]
    fn no_bands_without_margin_band() {
        let spec = build(
            &mode(1200, 825, 0, None),
            &headers(&[BANNER_TOP_HEADER, BANNER_BOTTOM_HEADER]),
            None,
        );
        assert_eq!(spec.border_top, 0);
        assert_eq!(spec.border_bottom, 0);
        assert_eq!(spec.fit, FitMode::Pad);
    }

    #[test]
    fn both_banners_reserve_both_bands() {
        let spec = build(
            &mode(1200, 825, 40, Some(FitMode::Cover)),
            &headers(&[BANNER_TOP_HEADER, BANNER_BOTTOM_HEADER]),
            None,
        );
        assert_eq!(spec.height, 745);
        assert_eq!(spec.border_top, 40);
        assert_eq!(spec.border_bottom, 40);
    }

    #[test]
    fn override_wins_over_request_fit() {
        let spec = build(&mode(1200, 825, 0, Some(FitMode::Cover)), &[], Some(FitMode::Contain));
        assert_eq!(spec.fit, FitMode::Contain);
    }

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
        let decoded = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .unwrap()
            .decode()
            .unwrap();
        (decoded.width(), decoded.height())
    }

    #[test]
    fn pad_produces_exact_canvas() {
        let query: HashMap<String, String> = HashMap::new();
        let mode = Mode::resolve(&query);
        let spec = build(
            &Mode {
                width: 64,
                height: 48,
                ..mode
            },
            &[],
            None,
        );
        let out = apply(&spec, &png_fixture(16, 16)).unwrap();
        assert_eq!(decoded_dimensions(&out), (64, 48));
    }

    #[test]
    fn cover_with_bands_restores_requested_height() {
        let spec = build(
            &mode(64, 48, 8, Some(FitMode::Cover)),
            &headers(&[BANNER_TOP_HEADER, BANNER_BOTTOM_HEADER]),
            None,
        );
        assert_eq!(spec.height, 32);
        let out = apply(&spec, &png_fixture(100, 100)).unwrap();
        assert_eq!(decoded_dimensions(&out), (64, 48));
    }

    #[test]
    fn zero_canvas_is_rejected() {
        let spec = TransformSpec {
            width: 0,
            height: 48,
            fit: FitMode::Pad,
            border_top: 0,
            border_bottom: 0,
        };
        assert!(matches!(
            apply(&spec, &png_fixture(4, 4)),
            Err(TransformError::EmptyCanvas)
        ));
    }
}
