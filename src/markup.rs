use crate::mode::Mode;
use maud::{Markup, PreEscaped, html};
use serde_json::Value;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Root-relative URL rewriting for markup injected into the headless
/// browser. Pages are loaded from a data: URL, so `/styles/retro.css` and
/// friends would otherwise resolve nowhere; they are rewritten against the
/// request's own origin before the page is set.
const REWRITE_ATTRS: [&str; 3] = ["href", "src", "action"];

pub fn absolutize(html: &str, origin: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len() + 64);
    let mut i = 0;
    while i < bytes.len() {
        let mut rewritten = false;
        if at_ident_boundary(bytes, i) {
            for attr in REWRITE_ATTRS {
                if let Some(value_start) = match_attr_value(bytes, i, attr) {
                    let root_relative = bytes.get(value_start) == Some(&b'/')
                        && bytes.get(value_start + 1) != Some(&b'/');
                    if root_relative {
                        out.push_str(&html[i..value_start]);
                        out.push_str(origin);
                        i = value_start;
                        rewritten = true;
                        break;
                    }
                }
            }
        }
        if !rewritten {
            let len = utf8_len(bytes[i]);
            out.push_str(&html[i..i + len]);
            i += len;
        }
    }
    out
}

fn at_ident_boundary(bytes: &[u8], i: usize) -> bool {
    if i == 0 {
        return true;
    }
    let prev = bytes[i - 1];
    !(prev.is_ascii_alphanumeric() || prev == b'-' || prev == b'_')
}

/// If an `attr = "` sequence starts at `i`, return the index of the first
/// byte of the attribute value.
fn match_attr_value(bytes: &[u8], i: usize, attr: &str) -> Option<usize> {
    let name = attr.as_bytes();
    if bytes.len() < i + name.len() || &bytes[i..i + name.len()] != name {
        return None;
    }
    let mut j = i + name.len();
    while bytes.get(j) == Some(&b' ') {
        j += 1;
    }
    if bytes.get(j) != Some(&b'=') {
        return None;
    }
    j += 1;
    while bytes.get(j) == Some(&b' ') {
        j += 1;
    }
    match bytes.get(j) {
        Some(&b'"') | Some(&b'\'') => Some(j + 1),
        _ => None,
    }
}

fn utf8_len(leading: u8) -> usize {
    match leading {
        byte if byte < 0x80 => 1,
        byte if byte >= 0xF0 => 4,
        byte if byte >= 0xE0 => 3,
        _ => 2,
    }
}

// ---------------------------------------------------------------------------
// Page templates for render-kind providers. Screenshot targets rely on the
// container classes below (`.inky-content`, `.container`).
// ---------------------------------------------------------------------------

/// Article listing (NYT top stories). Thumbnail preference follows the
/// upstream multimedia format names.
pub fn articles_page(articles: &[Value], mode: &Mode, footer_logo: Option<&str>) -> String {
    let css = articles_css(mode);
    let page: Markup = html! {
        html lang="en" {
            head {
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                style { (PreEscaped(css)) }
            }
            body {
                div class="inky-content" {
                    @for article in articles {
                        div class="article-cell" {
                            div class="content-cell" {
                                @if let Some(thumbnail) = article_thumbnail(article) {
                                    div class="image-cell" {
                                        img src=(thumbnail) alt=(text_field(article, "title"));
                                    }
                                }
                                div {
                                    div class="title-cell" {
                                        div class="title" { (text_field(article, "title")) }
                                        div class="byline" { (text_field(article, "byline")) }
                                    }
                                    div class="article-abstract" { (text_field(article, "abstract")) }
                                }
                            }
                        }
                        hr;
                    }
                    @if let Some(logo) = footer_logo {
                        div class="footer-cell" { img src=(logo); }
                    }
                }
            }
        }
    };
    page.into_string()
}

const THUMBNAIL_FORMATS: [&str; 3] = ["Large Thumbnail", "Standard Thumbnail", "Small Thumbnail"];

fn article_thumbnail(article: &Value) -> Option<String> {
    let media = article.get("multimedia")?.as_array()?;
    media
        .iter()
        .find(|item| {
            item.get("format")
                .and_then(Value::as_str)
                .is_some_and(|format| THUMBNAIL_FORMATS.contains(&format))
        })
        .and_then(|item| item.get("url").and_then(Value::as_str))
        .map(str::to_string)
}

fn articles_css(mode: &Mode) -> String {
    format!(
        r#"
body {{ margin: 0; padding: 0; display: flex; justify-content: center; align-items: center; }}
.inky-content {{
    color: #333;
    width: {width}px;
    max-width: 100vw;
    margin: 0 auto;
    padding: 8px;
    height: 100vh;
    max-height: {height}px;
    overflow: hidden;
    box-sizing: border-box;
    border: 1px solid #333;
}}
.content-cell {{ display: flex; flex-direction: row; justify-content: space-between; }}
.title {{ font-weight: 800; font-size: 1.3em; }}
.byline {{ font-weight: 600; font-size: 1em; }}
.article-cell {{ display: flex; justify-content: space-between; }}
.image-cell {{ margin-right: 16px; }}
.image-cell img {{ width: 110px; height: 110px; }}
.article-abstract {{ font-weight: 700; font-size: 1.1em; }}
.footer-cell {{ position: sticky; top: 100%; }}
"#,
        width = mode.width,
        height = mode.height,
    )
}

/// Hacker News front page.
pub fn hn_page(data: &Value, _mode: &Mode) -> String {
    let hits = data
        .get("hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let page: Markup = html! {
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Hacker News" }
                link rel="stylesheet" href="/styles/retro.css";
                link rel="stylesheet" href="/styles/queries.css";
            }
            body {
                a href="/" class="home-btn" { "Home" }
                div class="container" {
                    div class="content" {
                        div class="articles" style="--gap:0.6rem;" {
                            @for post in &hits {
                                span class="underline" {
                                    a href=(text_field(post, "url")) target="_blank" {
                                        h3 class="fs-xs" style="margin-bottom:0.2rem;" {
                                            (text_field(post, "title"))
                                        }
                                    }
                                    div class="fs-xxs" style="margin-bottom:0.2rem;" {
                                        (epoch_to_datetime(post.get("created_at_i").and_then(Value::as_i64)))
                                        " - " (text_field(post, "author"))
                                        " - " (int_field(post, "points")) " points"
                                        " - " (int_field(post, "num_comments")) " comments - "
                                        a href=(item_link(post)) target="_blank" {
                                            "#" (text_field(post, "objectID"))
                                        }
                                    }
                                }
                            }
                        }
                    }
                    footer class="sp:fs-xxs" { "Hacker News" }
                }
            }
        }
    };
    page.into_string()
}

fn item_link(post: &Value) -> String {
    format!(
        "https://news.ycombinator.com/item?id={}",
        text_field(post, "objectID")
    )
}

/// Current conditions plus a seven-day forecast table.
pub fn weather_page(data: &Value, _mode: &Mode) -> String {
    let empty = Value::Object(serde_json::Map::new());
    let current = data.get("currentConditions").unwrap_or(&empty);
    let days: Vec<Value> = data
        .get("days")
        .and_then(Value::as_array)
        .map(|days| days.iter().take(7).cloned().collect())
        .unwrap_or_default();
    let current_icon = text_or(current, "icon", "clear-day");
    let page: Markup = html! {
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Retro Weather" }
                link rel="stylesheet" href="/styles/retro.css";
                link rel="stylesheet" href="/styles/queries.css";
                link rel="stylesheet" href="/styles/weather.css";
            }
            body {
                a href="/" class="home-btn" { "Home" }
                div class="container" {
                    div class="content sp:bg-2 sl:bg-2" {
                        div class="sp:color-5 sl:color-5" style="display:flex; flex-direction:column; align-items:center; margin-bottom:0.5rem; margin-top:1.2rem;" {
                            i class=(format!("w-{current_icon} sp:fs-4xl sl:fs-4xl lp:fs-8xl ll:fs-8xl")) {}
                            p style="margin:0;margin-top:0.5rem;text-align:center;" {
                                strong {
                                    (num_field(current, "temp")) "°F (" (num_field(current, "feelslike")) "°F)"
                                }
                                br;
                                (text_or(current, "conditions", "???"))
                                " at "
                                (epoch_to_time(current.get("datetimeEpoch").and_then(Value::as_i64)))
                            }
                        }
                        hr;
                        span class="center" {
                            table {
                                thead {
                                    tr {
                                        th { "Day" }
                                        th { "High" }
                                        th { "Low" }
                                        th { "Conditions" }
                                        th {}
                                    }
                                }
                                tbody {
                                    @for day in &days {
                                        tr {
                                            td { (day_abbrev(text_field(day, "datetime").as_str())) }
                                            td { (num_field(day, "tempmax")) "°F" }
                                            td { (num_field(day, "tempmin")) "°F" }
                                            td { (text_or(day, "conditions", "???")) }
                                            td {
                                                i class=(format!("w-{} fs-2xl", text_or(day, "icon", "clear-day"))) {}
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                    footer class="sp:fs-xxs" { (text_or(data, "address", "???")) }
                }
            }
        }
    };
    page.into_string()
}

fn text_field(value: &Value, field: &str) -> String {
    text_or(value, field, "???")
}

fn text_or(value: &Value, field: &str, default: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn int_field(value: &Value, field: &str) -> i64 {
    value.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn num_field(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::String(text)) => text.clone(),
        _ => "???".to_string(),
    }
}

fn epoch_to_datetime(epoch: Option<i64>) -> String {
    let Some(epoch) = epoch else {
        return "???".to_string();
    };
    let format =
        format_description!("[month repr:short] [day], [year], [hour repr:12]:[minute] [period]");
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|stamp| stamp.format(&format).ok())
        .unwrap_or_else(|| "???".to_string())
}

fn epoch_to_time(epoch: Option<i64>) -> String {
    let Some(epoch) = epoch else {
        return "???".to_string();
    };
    let format = format_description!("[hour repr:12]:[minute]:[second] [period]");
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|stamp| stamp.format(&format).ok())
        .unwrap_or_else(|| "???".to_string())
}

fn day_abbrev(date: &str) -> String {
    let format = format_description!("[year]-[month]-[day]");
    let Ok(parsed) = Date::parse(date, &format) else {
        return "???".to_string();
    };
    match parsed.weekday() {
        time::Weekday::Sunday => "Sun",
        time::Weekday::Monday => "Mon",
        time::Weekday::Tuesday => "Tue",
        time::Weekday::Wednesday => "Wed",
        time::Weekday::Thursday => "Thu",
        time::Weekday::Friday => "Fri",
        time::Weekday::Saturday => "Sat",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORIGIN: &str = "https://gateway.test";

    #[test]
    fn rewrites_root_relative_attributes() {
        let html = r#"<link rel="stylesheet" href="/styles/retro.css"><img src="/logo.png">"#;
        let out = absolutize(html, ORIGIN);
        assert!(out.contains(r#"href="https://gateway.test/styles/retro.css""#));
        assert!(out.contains(r#"src="https://gateway.test/logo.png""#));
    }

    #[test]
    fn leaves_absolute_and_protocol_relative_urls() {
        let html = r#"<a href="https://example.com/a"><img src="//cdn.example.com/b.png">"#;
        assert_eq!(absolutize(html, ORIGIN), html);
    }

    #[test]
    fn handles_single_quotes_and_action() {
        let html = "<form action='/submit'><a href='/home'>x</a></form>";
        let out = absolutize(html, ORIGIN);
        assert!(out.contains("action='https://gateway.test/submit'"));
        assert!(out.contains("href='https://gateway.test/home'"));
    }

    #[test]
    fn does_not_touch_prefixed_attribute_names() {
        let html = r#"<img data-src="/lazy.png" src="x.png">"#;
        assert_eq!(absolutize(html, ORIGIN), html);
    }

    #[test]
    fn trailing_origin_slash_is_not_doubled() {
        let out = absolutize(r#"<a href="/a">"#, "https://gateway.test/");
        assert!(out.contains(r#"href="https://gateway.test/a""#));
    }

    #[test]
    fn preserves_non_ascii_content() {
        let html = r#"<p>überraschung — <a href="/ä">ä</a></p>"#;
        let out = absolutize(html, ORIGIN);
        assert!(out.contains("überraschung"));
        assert!(out.contains(r#"href="https://gateway.test/ä""#));
    }

    fn mode() -> Mode {
        Mode {
            width: 1200,
            height: 825,
            margin_band: 0,
            fit: None,
        }
    }

    #[test]
    fn articles_page_renders_titles_and_footer() {
        let articles = vec![json!({
            "title": "A <Headline>",
            "byline": "By Someone",
            "abstract": "Things happened.",
            "multimedia": [{"format": "Large Thumbnail", "url": "https://img.example/t.jpg"}],
        })];
        let page = articles_page(&articles, &mode(), Some("data:image/png;base64,xyz"));
        assert!(page.contains("A &lt;Headline&gt;"));
        assert!(page.contains("https://img.example/t.jpg"));
        assert!(page.contains("footer-cell"));
        assert!(page.contains("inky-content"));
    }

    #[test]
    fn hn_page_lists_posts_with_metadata() {
        let data = json!({
            "hits": [{
                "title": "Show HN: Something",
                "url": "https://example.com/show",
                "author": "pg",
                "points": 123,
                "num_comments": 45,
                "objectID": "9999",
                "created_at_i": 1700000000,
            }]
        });
        let page = hn_page(&data, &mode());
        assert!(page.contains("Show HN: Something"));
        assert!(page.contains("123 points"));
        assert!(page.contains("news.ycombinator.com/item?id=9999"));
        assert!(page.contains(r#"class="container""#));
    }

    #[test]
    fn weather_page_survives_missing_fields() {
        let page = weather_page(&json!({}), &mode());
        assert!(page.contains("???"));
        assert!(page.contains(r#"class="container""#));
    }

    #[test]
    fn weather_page_renders_forecast_rows() {
        let data = json!({
            "address": "Portland, OR",
            "currentConditions": {
                "icon": "rain",
                "temp": 52.3,
                "feelslike": 49.1,
                "conditions": "Rain",
                "datetimeEpoch": 1700000000,
            },
            "days": [
                {"datetime": "2026-01-15", "tempmax": 55, "tempmin": 41, "conditions": "Rain", "icon": "rain"},
            ]
        });
        let page = weather_page(&data, &mode());
        assert!(page.contains("Portland, OR"));
        assert!(page.contains("w-rain"));
        assert!(page.contains("Thu"));
    }

    #[test]
    fn day_abbrev_parses_iso_dates() {
        assert_eq!(day_abbrev("2026-08-06"), "Thu");
        assert_eq!(day_abbrev("not-a-date"), "???");
    }
}
