use std::collections::HashMap;

pub const DEFAULT_WIDTH: u32 = 1200;
pub const DEFAULT_HEIGHT: u32 = 825;

/// Target canvas geometry for a single request: output dimensions, the
/// reserved margin-band height for overlaid banners, and an optional fit
/// mode. Built once from the query string and then owned by the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    pub margin_band: u32,
    pub fit: Option<FitMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    Pad,
    Cover,
    Contain,
    ScaleDown,
    Fillmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl FitMode {
    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pad" => Some(Self::Pad),
            "cover" => Some(Self::Cover),
            "contain" => Some(Self::Contain),
            "scale-down" => Some(Self::ScaleDown),
            "fillmax" => Some(Self::Fillmax),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pad => "pad",
            Self::Cover => "cover",
            Self::Contain => "contain",
            Self::ScaleDown => "scale-down",
            Self::Fillmax => "fillmax",
        }
    }
}

impl Mode {
    /// Resolve raw query parameters into a fully populated mode. Missing or
    /// non-numeric values fall back to the defaults; zero or negative-ish
    /// inputs are not corrected here (callers get what they asked for).
    pub fn resolve(query: &HashMap<String, String>) -> Self {
        Mode {
            width: parse_dim(query.get("w"), DEFAULT_WIDTH),
            height: parse_dim(query.get("h"), DEFAULT_HEIGHT),
            margin_band: parse_dim(query.get("mbh"), 0),
            fit: query.get("fit").and_then(|value| FitMode::from_param(value)),
        }
    }

    pub fn orientation(&self) -> Orientation {
        if self.width >= self.height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }

    /// Reserve banner space by shrinking the content height. Applied exactly
    /// once per request, before any upstream fetch, so aspect parameters sent
    /// upstream see the adjusted height.
    pub fn apply_margin_offset(&mut self, margin_offset: u32) {
        if self.margin_band > 0 && margin_offset > 0 {
            self.height = self
                .height
                .saturating_sub(self.margin_band * margin_offset);
        }
    }

    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn parse_dim(value: Option<&String>, default: u32) -> u32 {
    value
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_explicit_parameters() {
        let mode = Mode::resolve(&query(&[("w", "800"), ("h", "600"), ("mbh", "40")]));
        assert_eq!(mode.width, 800);
        assert_eq!(mode.height, 600);
        assert_eq!(mode.margin_band, 40);
        assert_eq!(mode.fit, None);
    }

    #[test]
    fn missing_parameters_use_defaults() {
        let mode = Mode::resolve(&HashMap::new());
        assert_eq!(mode.width, DEFAULT_WIDTH);
        assert_eq!(mode.height, DEFAULT_HEIGHT);
        assert_eq!(mode.margin_band, 0);
        assert_eq!(mode.fit, None);
    }

    #[test]
    fn non_numeric_width_falls_back() {
        let mode = Mode::resolve(&query(&[("w", "abc"), ("h", "600")]));
        assert_eq!(mode.width, DEFAULT_WIDTH);
        assert_eq!(mode.height, 600);
    }

    #[test]
    fn fit_parses_known_values() {
        let mode = Mode::resolve(&query(&[("fit", "cover")]));
        assert_eq!(mode.fit, Some(FitMode::Cover));
        let mode = Mode::resolve(&query(&[("fit", "bogus")]));
        assert_eq!(mode.fit, None);
    }

    #[test]
    fn margin_offset_shrinks_height_once() {
        let mut mode = Mode::resolve(&query(&[("h", "825"), ("mbh", "10")]));
        mode.apply_margin_offset(2);
        assert_eq!(mode.height, 805);
    }

    #[test]
    fn margin_offset_ignored_without_band() {
        let mut mode = Mode::resolve(&query(&[("h", "825")]));
        mode.apply_margin_offset(2);
        assert_eq!(mode.height, 825);
    }

    #[test]
    fn orientation_follows_geometry() {
        let mode = Mode::resolve(&query(&[("w", "600"), ("h", "448")]));
        assert_eq!(mode.orientation(), Orientation::Landscape);
        let mode = Mode::resolve(&query(&[("w", "825"), ("h", "1200")]));
        assert_eq!(mode.orientation(), Orientation::Portrait);
    }
}
