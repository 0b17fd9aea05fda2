use crate::fallback;
use crate::markup;
use crate::mode::{Mode, Orientation};
use crate::registry::{
    DataAcquisition, ProviderDescriptor, ProviderSpec, RequestContext, Target, UpstreamData,
};
use crate::transform::{BANNER_BOTTOM_HEADER, BANNER_TOP_HEADER};
use serde_json::Value;
use url::Url;

/// The full provider catalog: image providers, render providers, and remote
/// page providers merged into one list, each entry tagged with its kind.
pub fn catalog() -> Vec<ProviderDescriptor> {
    vec![
        nasa(),
        unsplash(),
        wallhaven(),
        rawg(),
        nytimes(),
        news(),
        hn(),
        weather(),
        example(),
        example_target(),
    ]
}

fn accept_json(_ctx: &RequestContext) -> Vec<(String, String)> {
    vec![("Accept".to_string(), "application/json".to_string())]
}

/// Imgix-style sizing arguments shared by the photo providers.
fn imgix(mut image: Url, mode: &Mode) -> Url {
    image
        .query_pairs_mut()
        .append_pair("w", &mode.width.to_string())
        .append_pair("h", &mode.height.to_string())
        .append_pair("fit", "fillmax")
        .append_pair("fill", "blur")
        .append_pair("format", "jpg")
        .append_pair("jpeg-progressive", "false");
    image
}

fn parse_or_placeholder(raw: Option<&str>, mode: &Mode, ctx: &RequestContext) -> Url {
    raw.and_then(|candidate| Url::parse(candidate).ok())
        .unwrap_or_else(|| fallback::placeholder_url(mode, &ctx.config))
}

fn settings_banner(upstream: &str) -> Vec<(String, String)> {
    vec![(
        BANNER_BOTTOM_HEADER.to_string(),
        format!("Invalid response from {upstream}; using Lorem Picsum."),
    )]
}

// ---------------------------------------------------------------------------
// nasa: Astronomy Picture of the Day
// ---------------------------------------------------------------------------

fn nasa() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "nasa",
        description: Some("Astronomy Picture of the Day"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Endpoint(nasa_endpoint)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Image {
            image_url: nasa_image,
            response_headers: nasa_headers,
            fit: None,
        },
    }
}

fn nasa_endpoint(_mode: &Mode, ctx: &RequestContext) -> Url {
    let mut url = Url::parse("https://api.nasa.gov/planetary/apod").expect("static url");
    url.query_pairs_mut()
        .append_pair("api_key", &ctx.config.nasa_api_key);
    url
}

fn nasa_headers(data: &UpstreamData, _mode: &Mode) -> Vec<(String, String)> {
    if data.get("url").and_then(Value::as_str).is_none() {
        return settings_banner("NASA");
    }
    let title = data.get("title").and_then(Value::as_str).unwrap_or("???");
    let date = data.get("date").and_then(Value::as_str).unwrap_or("???");
    vec![
        (BANNER_TOP_HEADER.to_string(), format!("\"{title}\"")),
        (BANNER_BOTTOM_HEADER.to_string(), format!("APOD by NASA ({date})")),
    ]
}

fn nasa_image(data: &UpstreamData, mode: &Mode, ctx: &RequestContext) -> Url {
    let candidate = data
        .get("hdurl")
        .and_then(Value::as_str)
        .or_else(|| data.get("url").and_then(Value::as_str));
    parse_or_placeholder(candidate, mode, ctx)
}

// ---------------------------------------------------------------------------
// unsplash: random photo
// ---------------------------------------------------------------------------

fn unsplash() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "unsplash",
        description: Some("Random photo from Unsplash"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Endpoint(unsplash_endpoint)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Image {
            image_url: unsplash_image,
            response_headers: unsplash_headers,
            fit: None,
        },
    }
}

fn orientation_param(mode: &Mode) -> &'static str {
    match mode.orientation() {
        Orientation::Landscape => "landscape",
        Orientation::Portrait => "portrait",
    }
}

fn unsplash_endpoint(mode: &Mode, ctx: &RequestContext) -> Url {
    let mut url = Url::parse("https://api.unsplash.com/photos/random").expect("static url");
    url.query_pairs_mut()
        .append_pair("client_id", &ctx.config.unsplash_client_id)
        .append_pair("orientation", orientation_param(mode));
    url
}

fn unsplash_headers(data: &UpstreamData, _mode: &Mode) -> Vec<(String, String)> {
    if data.pointer("/urls/raw").and_then(Value::as_str).is_none() {
        return settings_banner("Unsplash");
    }
    let description = data
        .get("alt_description")
        .and_then(Value::as_str)
        .unwrap_or("???");
    let name = data.pointer("/user/name").and_then(Value::as_str).unwrap_or("???");
    let username = data
        .pointer("/user/username")
        .and_then(Value::as_str)
        .unwrap_or("???");
    let likes = data.get("likes").and_then(Value::as_i64).unwrap_or(0);
    vec![
        (BANNER_TOP_HEADER.to_string(), format!("\"{description}\"")),
        (
            BANNER_BOTTOM_HEADER.to_string(),
            format!("by {name} (@{username}) on Unsplash ({likes} likes)"),
        ),
    ]
}

fn unsplash_image(data: &UpstreamData, mode: &Mode, ctx: &RequestContext) -> Url {
    let raw = data.pointer("/urls/raw").and_then(Value::as_str);
    imgix(parse_or_placeholder(raw, mode, ctx), mode)
}

// ---------------------------------------------------------------------------
// wallhaven: random wallpaper search
// ---------------------------------------------------------------------------

fn wallhaven() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "wallhaven",
        description: Some("Random wallpaper from Wallhaven"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Endpoint(wallhaven_endpoint)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Image {
            image_url: wallhaven_image,
            response_headers: wallhaven_headers,
            fit: None,
        },
    }
}

fn wallhaven_endpoint(mode: &Mode, ctx: &RequestContext) -> Url {
    let ratio = match mode.orientation() {
        Orientation::Landscape => "1.45x1",
        Orientation::Portrait => "0.69x1",
    };
    let mut url = Url::parse("https://wallhaven.cc/api/v1/search").expect("static url");
    url.query_pairs_mut()
        .append_pair("apikey", &ctx.config.wallhaven_api_key)
        .append_pair("sorting", "random")
        .append_pair("categories", "101")
        .append_pair("purity", "100")
        .append_pair("ratios", ratio);
    url
}

fn wallhaven_headers(data: &UpstreamData, _mode: &Mode) -> Vec<(String, String)> {
    let Some(first) = data.pointer("/data/0") else {
        return settings_banner("Wallhaven");
    };
    if first.get("path").and_then(Value::as_str).is_none() {
        return settings_banner("Wallhaven");
    }
    let id = first.get("id").and_then(Value::as_str).unwrap_or("???");
    let views = first.get("views").and_then(Value::as_i64).unwrap_or(0);
    let favorites = first.get("favorites").and_then(Value::as_i64).unwrap_or(0);
    vec![(
        BANNER_BOTTOM_HEADER.to_string(),
        format!("{id} on Wallhaven ({views} views, {favorites} favorites)"),
    )]
}

fn wallhaven_image(data: &UpstreamData, mode: &Mode, ctx: &RequestContext) -> Url {
    let mut raw = data
        .pointer("/data/0/path")
        .and_then(Value::as_str)
        .map(str::to_string);
    // Optional CDN front for full-size downloads.
    if let (Some(path), Some(imgix_base)) = (raw.as_mut(), ctx.config.wallhaven_imgix_url.as_ref())
    {
        *path = path.replace("https://w.wallhaven.cc/full", imgix_base);
    }
    imgix(parse_or_placeholder(raw.as_deref(), mode, ctx), mode)
}

// ---------------------------------------------------------------------------
// rawg: random game screenshot
// ---------------------------------------------------------------------------

fn rawg() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "rawg",
        description: Some("Random game screenshot from RAWG.io"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Custom(crate::rawg::fetch)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Image {
            image_url: rawg_image,
            response_headers: rawg_headers,
            fit: None,
        },
    }
}

fn rawg_headers(data: &UpstreamData, _mode: &Mode) -> Vec<(String, String)> {
    let Some(name) = data.pointer("/game/name").and_then(Value::as_str) else {
        return settings_banner("RAWG");
    };
    let released = data
        .pointer("/game/released")
        .and_then(Value::as_str)
        .unwrap_or("???");
    let source = data
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("RAWG.io");
    vec![
        (BANNER_TOP_HEADER.to_string(), format!("\"{name}\" ({released})")),
        (BANNER_BOTTOM_HEADER.to_string(), source.to_string()),
    ]
}

fn rawg_image(data: &UpstreamData, mode: &Mode, ctx: &RequestContext) -> Url {
    let candidate = data
        .pointer("/screenshots/0/url")
        .and_then(Value::as_str)
        .or_else(|| data.pointer("/game/background").and_then(Value::as_str));
    parse_or_placeholder(candidate, mode, ctx)
}

// ---------------------------------------------------------------------------
// nytimes: top stories (render), with the `news` alias
// ---------------------------------------------------------------------------

/// NYT attribution logo, embedded so the footer renders without a network
/// round trip inside the headless browser.
const NYTIMES_LOGO: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAMgAAAAoAgMAAADGcl2PAAAAGXRFWHRTb2Z0d2FyZQBBZG9iZSBJbWFnZVJlYWR5ccllPAAAAAxQTFRFFhYW8fHxdnZ2uLi4DSzGmAAAApdJREFUOMvt1TFo20AUANBvuSqWjIqHKvaQoUMuDWk7HmQqgk5HGjCJv2VSl5wcOmiTm61goiS0W2iHKGQoNFA6JKWQJZ29aDAlkKFKM2bvbDoF90uWTeJm8dYhp+G4E8/3/f8/G3DsAbdkbFIBGpnxCR1mK/i6DlWOkklWZ+4LVzJPk/HadW8iAdpPTWm/rzBc7cx3Gp1mU6x21rrz27R2Tm4iHO0ifx6F9RAdIRyxtuQKx1nrChcdd5GNEn3fABVtk78LwmWBjW3LWFhaXhBO0zOEg9Kom6OE2RuWFhPdDBc3sHE8z8RSPSTSxPgUpxKMEvoMK4v2RHGWhY3P6KA4WXUqTDgukc6N5BMRQBvOzLehWIyJU3tS5YIylrEYSu1fUviKccrGqcujHzkANhZRAyLGWKRo5sZpmZjsmN8Bsnavt55sXa5EyWxf2l2aaHOl1/t9nfw0dwE06gIr2cqW+5WrZmqcJhlhDZStUUKBqUOipAQVLxiSkVPOzJxPTVY2rRa2aOvUbCXv2hZ20SaCMrjElysYP33yq5RrU12I+FWIEApF+PhQNVBu1pXanDyn/g+2LP/C9Hmb9UlgaW26MERgb4YjPLifm5o2VCxnvP09kBdRQgCmdUM30h57cwzZhHgfdhjmoDRx906eYc2QpyVdbmJCypNTLJ/vpqXEKmh9ckSLPBTgXk7hWFGt8hyXMCCPIQNpYFlKiZGS2S+o+YXZb9A2hyQaEP2gnUlv5WGcsH5gQYCaVeLHvhUQocC4PAqGgb36s3H17idkb4ah5k3q6ibltqLS1+fylKdkWs/rmau/MAnZJauVi8CfeUikptS4PGcpYT7z1SFRBqXtF3F9sOxea0gqZRST6iGNg9s/i/+L/AVC635diokBGQAAAABJRU5ErkJggg==";

fn nytimes() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "nytimes",
        description: Some("Top stories from The New York Times"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Endpoint(nytimes_endpoint)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Render {
            markup: nytimes_markup,
            target: Target::Css(".inky-content"),
            response_headers: None,
            options: None,
        },
    }
}

fn news() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "news",
        description: None,
        hidden: false,
        margin_offset: 0,
        data: None,
        api_headers: None,
        spec: ProviderSpec::Alias { target: "nytimes" },
    }
}

fn nytimes_endpoint(_mode: &Mode, ctx: &RequestContext) -> Url {
    let section = ctx
        .params
        .get("section")
        .map(String::as_str)
        .filter(|section| !section.is_empty())
        .unwrap_or("world");
    let mut url = Url::parse("https://api.nytimes.com/svc/news/v3/content/nyt/world.json")
        .expect("static url");
    url.set_path(&format!("/svc/news/v3/content/nyt/{section}.json"));
    url.query_pairs_mut()
        .append_pair("api-key", &ctx.config.nytimes_api_key);
    url
}

fn nytimes_markup(data: &UpstreamData, mode: &Mode, _ctx: &RequestContext) -> String {
    // Landscape panels fit fewer, wider article rows.
    let count = if mode.width > mode.height { 6 } else { 8 };
    let articles: Vec<Value> = data
        .get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().take(count).cloned().collect())
        .unwrap_or_default();
    markup::articles_page(&articles, mode, Some(NYTIMES_LOGO))
}

// ---------------------------------------------------------------------------
// hn: Hacker News front page (render)
// ---------------------------------------------------------------------------

fn hn() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "hn",
        description: Some("Hacker News front page"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Endpoint(hn_endpoint)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Render {
            markup: hn_markup,
            target: Target::Container,
            response_headers: None,
            options: None,
        },
    }
}

fn hn_endpoint(mode: &Mode, _ctx: &RequestContext) -> Url {
    let hits = if mode.width > mode.height { 10 } else { 14 };
    let mut url = Url::parse("https://hn.algolia.com/api/v1/search").expect("static url");
    url.query_pairs_mut()
        .append_pair("tags", "front_page")
        .append_pair("hitsPerPage", &hits.to_string());
    url
}

fn hn_markup(data: &UpstreamData, mode: &Mode, _ctx: &RequestContext) -> String {
    markup::hn_page(data, mode)
}

// ---------------------------------------------------------------------------
// weather: timeline forecast (render)
// ---------------------------------------------------------------------------

fn weather() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "weather",
        description: Some("Current conditions and 7-day forecast"),
        hidden: false,
        margin_offset: 0,
        data: Some(DataAcquisition::Endpoint(weather_endpoint)),
        api_headers: Some(accept_json),
        spec: ProviderSpec::Render {
            markup: weather_markup,
            target: Target::Container,
            response_headers: None,
            options: None,
        },
    }
}

fn weather_endpoint(_mode: &Mode, ctx: &RequestContext) -> Url {
    let location = ctx
        .params
        .get("location")
        .map(String::as_str)
        .filter(|location| !location.is_empty())
        .unwrap_or(&ctx.config.weather_location);
    let mut url = Url::parse(
        "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline/x",
    )
    .expect("static url");
    url.set_path(&format!(
        "/VisualCrossingWebServices/rest/services/timeline/{location}"
    ));
    url.query_pairs_mut()
        .append_pair("key", &ctx.config.weather_api_key)
        .append_pair("unitGroup", "us")
        .append_pair("include", "days,current");
    url
}

fn weather_markup(data: &UpstreamData, mode: &Mode, _ctx: &RequestContext) -> String {
    markup::weather_page(data, mode)
}

// ---------------------------------------------------------------------------
// remote page demos
// ---------------------------------------------------------------------------

fn example() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "example",
        description: Some("Whole-page capture demo"),
        hidden: true,
        margin_offset: 0,
        data: None,
        api_headers: None,
        spec: ProviderSpec::Remote {
            target_url: example_url,
            target: Target::Page,
            options: None,
        },
    }
}

fn example_target() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "example-target",
        description: Some("Element capture demo"),
        hidden: true,
        margin_offset: 0,
        data: None,
        api_headers: None,
        spec: ProviderSpec::Remote {
            target_url: example_url,
            target: Target::Css("body div"),
            options: None,
        },
    }
}

fn example_url(_mode: &Mode, _ctx: &RequestContext) -> Url {
    Url::parse("https://example.com/").expect("static url")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::Registry;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx() -> RequestContext {
        let mut config = Config::for_tests();
        config.nasa_api_key = "nasa-key".to_string();
        config.unsplash_client_id = "unsplash-id".to_string();
        RequestContext {
            origin: "https://gateway.test".to_string(),
            params: HashMap::new(),
            user_agent: None,
            config: Arc::new(config),
        }
    }

    fn landscape() -> Mode {
        Mode {
            width: 1200,
            height: 825,
            margin_band: 0,
            fit: None,
        }
    }

    fn portrait() -> Mode {
        Mode {
            width: 825,
            height: 1200,
            margin_band: 0,
            fit: None,
        }
    }

    #[test]
    fn catalog_contains_every_documented_key() {
        let registry = Registry::with_defaults();
        for key in [
            "nasa",
            "unsplash",
            "wallhaven",
            "rawg",
            "nytimes",
            "news",
            "hn",
            "weather",
            "example",
            "example-target",
        ] {
            assert!(registry.lookup(key).is_some(), "missing {key}");
        }
        assert_eq!(registry.resolve("news").unwrap().key, "nytimes");
    }

    #[test]
    fn nasa_endpoint_carries_api_key() {
        let url = nasa_endpoint(&landscape(), &ctx());
        assert_eq!(url.host_str(), Some("api.nasa.gov"));
        assert!(url.query().unwrap().contains("api_key=nasa-key"));
    }

    #[test]
    fn nasa_prefers_hd_image_and_emits_both_banners() {
        let data = json!({
            "url": "https://apod.nasa.gov/small.jpg",
            "hdurl": "https://apod.nasa.gov/big.jpg",
            "title": "Pillars",
            "date": "2026-08-06",
        });
        let url = nasa_image(&data, &landscape(), &ctx());
        assert_eq!(url.as_str(), "https://apod.nasa.gov/big.jpg");
        let headers = nasa_headers(&data, &landscape());
        assert_eq!(headers[0].0, BANNER_TOP_HEADER);
        assert_eq!(headers[0].1, "\"Pillars\"");
        assert_eq!(headers[1].1, "APOD by NASA (2026-08-06)");
    }

    #[test]
    fn nasa_malformed_data_warns_and_falls_back() {
        let data = json!({});
        let headers = nasa_headers(&data, &landscape());
        assert_eq!(headers.len(), 1);
        assert!(headers[0].1.contains("Invalid response from NASA"));
        let url = nasa_image(&data, &landscape(), &ctx());
        assert_eq!(url.host_str(), Some("picsum.photos"));
    }

    #[test]
    fn unsplash_orientation_follows_mode() {
        let url = unsplash_endpoint(&landscape(), &ctx());
        assert!(url.query().unwrap().contains("orientation=landscape"));
        let url = unsplash_endpoint(&portrait(), &ctx());
        assert!(url.query().unwrap().contains("orientation=portrait"));
    }

    #[test]
    fn unsplash_image_gets_imgix_sizing() {
        let data = json!({"urls": {"raw": "https://images.unsplash.com/photo-1"}});
        let url = unsplash_image(&data, &landscape(), &ctx());
        let query = url.query().unwrap();
        assert!(query.contains("w=1200"));
        assert!(query.contains("h=825"));
        assert!(query.contains("fit=fillmax"));
    }

    #[test]
    fn wallhaven_ratio_depends_on_orientation() {
        let url = wallhaven_endpoint(&landscape(), &ctx());
        assert!(url.query().unwrap().contains("ratios=1.45x1"));
        let url = wallhaven_endpoint(&portrait(), &ctx());
        assert!(url.query().unwrap().contains("ratios=0.69x1"));
    }

    #[test]
    fn wallhaven_rewrites_full_host_when_cdn_configured() {
        let mut config = Config::for_tests();
        config.wallhaven_imgix_url = Some("https://wh.imgix.net".to_string());
        let ctx = RequestContext {
            origin: "https://gateway.test".to_string(),
            params: HashMap::new(),
            user_agent: None,
            config: Arc::new(config),
        };
        let data = json!({"data": [{"path": "https://w.wallhaven.cc/full/ab/wallhaven-ab1.jpg"}]});
        let url = wallhaven_image(&data, &landscape(), &ctx);
        assert_eq!(url.host_str(), Some("wh.imgix.net"));
    }

    #[test]
    fn rawg_banner_carries_game_and_credit() {
        let data = json!({
            "game": {"name": "Half-Life", "released": "1998-11-19"},
            "screenshots": [{"url": "https://media.rawg.io/s1.jpg"}],
            "source": "Images & data (c) RAWG.io",
        });
        let headers = rawg_headers(&data, &landscape());
        assert_eq!(headers[0].1, "\"Half-Life\" (1998-11-19)");
        assert_eq!(headers[1].1, "Images & data (c) RAWG.io");
        let url = rawg_image(&data, &landscape(), &ctx());
        assert_eq!(url.as_str(), "https://media.rawg.io/s1.jpg");
    }

    #[test]
    fn nytimes_endpoint_uses_section_param() {
        let mut context = ctx();
        context
            .params
            .insert("section".to_string(), "science".to_string());
        let url = nytimes_endpoint(&landscape(), &context);
        assert!(url.path().ends_with("/nyt/science.json"));
        let url = nytimes_endpoint(&landscape(), &ctx());
        assert!(url.path().ends_with("/nyt/world.json"));
    }

    #[test]
    fn nytimes_markup_limits_articles_by_orientation() {
        let results: Vec<Value> = (0..12)
            .map(|i| json!({"title": format!("Story {i}"), "byline": "By X", "abstract": "A"}))
            .collect();
        let data = json!({"results": results});
        let page = nytimes_markup(&data, &landscape(), &ctx());
        assert!(page.contains("Story 5"));
        assert!(!page.contains("Story 6"));
        let page = nytimes_markup(&data, &portrait(), &ctx());
        assert!(page.contains("Story 7"));
        assert!(!page.contains("Story 8"));
    }

    #[test]
    fn weather_endpoint_prefers_query_location() {
        let mut context = ctx();
        context
            .params
            .insert("location".to_string(), "Lisbon".to_string());
        let url = weather_endpoint(&landscape(), &context);
        assert!(url.path().ends_with("/timeline/Lisbon"));
    }

    #[test]
    fn remote_demos_are_hidden_but_resolvable() {
        let registry = Registry::with_defaults();
        assert!(!registry.keys(false).contains(&"example"));
        assert!(registry.resolve("example").is_some());
        let descriptor = registry.resolve("example-target").unwrap();
        match &descriptor.spec {
            ProviderSpec::Remote { target, .. } => {
                assert_eq!(target.selector().as_deref(), Some("body div"));
            }
            _ => panic!("expected remote provider"),
        }
        let descriptor = registry.resolve("example").unwrap();
        match &descriptor.spec {
            ProviderSpec::Remote { target, .. } => assert_eq!(target.selector(), None),
            _ => panic!("expected remote provider"),
        }
    }
}
