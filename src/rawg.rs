use crate::fetch::{FetchError, Fetcher, RetryPolicy};
use crate::mode::Mode;
use crate::registry::{RequestContext, UpstreamData};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use url::Url;

const API_BASE: &str = "https://api.rawg.io/api";
const PAGE_SIZE: u32 = 40;
const MAX_PAGES: u32 = 500;
const SAFE_PAGE_CAP: u32 = 200;
const SOURCE_NOTE: &str = "Images & data (c) RAWG.io";
/// Attempts at hitting a populated random page; the window shrinks after
/// each empty or out-of-range page.
const PAGE_SEARCH_ATTEMPTS: u32 = 8;
/// Overall tries at finding a game that actually has screenshots.
const GAME_ATTEMPTS: u32 = 10;
const SCREENSHOT_COUNT: usize = 6;

/// Data-acquisition capability for the random-game screenshot provider.
/// Either looks up an explicitly requested game (`game` query parameter) or
/// walks random catalog pages until one yields a game with screenshots.
pub fn fetch<'a>(
    fetcher: &'a Fetcher,
    _mode: &'a Mode,
    ctx: &'a RequestContext,
) -> Pin<Box<dyn Future<Output = Result<UpstreamData, FetchError>> + Send + 'a>> {
    Box::pin(async move {
        let key = ctx.config.rawg_api_key.clone();
        if let Some(search) = ctx.params.get("game") {
            return explicit_game(fetcher, &key, search).await;
        }
        random_game(fetcher, &key).await
    })
}

async fn explicit_game(
    fetcher: &Fetcher,
    key: &str,
    search: &str,
) -> Result<UpstreamData, FetchError> {
    let url = games_url(key, &[("search", search), ("page_size", "10")]);
    let listing = get(fetcher, &url).await?;
    let Some(game) = listing
        .pointer("/results/0")
        .filter(|game| !game.is_null())
        .cloned()
    else {
        return Err(FetchError::Provider(format!(
            "no RAWG match for \"{search}\""
        )));
    };
    let shots = screenshots_for(fetcher, key, &game).await?;
    if shots.is_empty() {
        let name = game_name(&game);
        return Err(FetchError::Provider(format!(
            "no screenshots found for \"{name}\""
        )));
    }
    Ok(result_payload(&game, shots))
}

async fn random_game(fetcher: &Fetcher, key: &str) -> Result<UpstreamData, FetchError> {
    let total_pages = probe_page_count(fetcher, key).await?;
    for _ in 0..GAME_ATTEMPTS {
        let mut games = random_page(fetcher, key, total_pages).await?;
        if games.is_empty() {
            continue;
        }
        {
            let mut rng = rand::thread_rng();
            games.shuffle(&mut rng);
        }
        let game = games.remove(0);
        let shots = screenshots_for(fetcher, key, &game).await?;
        if shots.is_empty() {
            continue;
        }
        return Ok(result_payload(&game, shots));
    }
    Err(FetchError::Provider(
        "could not find a random game with screenshots".to_string(),
    ))
}

/// One cheap page_size=1 call to learn the catalog size, clamped to the
/// documented page caps.
async fn probe_page_count(fetcher: &Fetcher, key: &str) -> Result<u32, FetchError> {
    let url = games_url(key, &[("page_size", "1")]);
    let probe = get(fetcher, &url).await?;
    let total = probe.get("count").and_then(Value::as_u64).unwrap_or(0);
    let pages = total.div_ceil(u64::from(PAGE_SIZE)) as u32;
    Ok(pages.clamp(1, MAX_PAGES.min(SAFE_PAGE_CAP)))
}

/// Pick random pages inside a shrinking window until one comes back
/// populated. Out-of-range pages surface as 404/"invalid page" and tighten
/// the window faster.
async fn random_page(
    fetcher: &Fetcher,
    key: &str,
    total_pages: u32,
) -> Result<Vec<Value>, FetchError> {
    let mut hi = total_pages.max(1);
    for _ in 0..PAGE_SEARCH_ATTEMPTS {
        let page = {
            let mut rng = rand::thread_rng();
            rng.gen_range(1..=hi)
        };
        let page_param = page.to_string();
        let size_param = PAGE_SIZE.to_string();
        let url = games_url(key, &[("page", &page_param), ("page_size", &size_param)]);
        match get(fetcher, &url).await {
            Ok(listing) => {
                let games = listing
                    .get("results")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if games.is_empty() {
                    hi = (page.saturating_sub(1)).max(1);
                    continue;
                }
                return Ok(games);
            }
            Err(err) if is_invalid_page(&err) => {
                hi = (hi.saturating_sub(1)).min(hi * 7 / 10).max(1);
            }
            Err(err) => return Err(err),
        }
    }
    // Last resort: the first page always exists.
    let size_param = PAGE_SIZE.to_string();
    let url = games_url(key, &[("page", "1"), ("page_size", &size_param)]);
    let listing = get(fetcher, &url).await?;
    Ok(listing
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

async fn screenshots_for(
    fetcher: &Fetcher,
    key: &str,
    game: &Value,
) -> Result<Vec<Value>, FetchError> {
    let id = game.get("id").and_then(Value::as_u64).unwrap_or(0);
    let mut url = Url::parse(API_BASE).expect("static url");
    url.set_path(&format!("/api/games/{id}/screenshots"));
    url.query_pairs_mut()
        .append_pair("key", key)
        .append_pair("page_size", &PAGE_SIZE.to_string());
    let listing = get(fetcher, &url).await?;
    let shots = listing
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut qualified: Vec<Value> = shots
        .iter()
        .filter(|shot| shot.get("image").and_then(Value::as_str).is_some())
        .cloned()
        .collect();
    {
        let mut rng = rand::thread_rng();
        qualified.shuffle(&mut rng);
    }
    qualified.truncate(SCREENSHOT_COUNT);
    Ok(qualified
        .into_iter()
        .map(|shot| {
            json!({
                "id": shot.get("id").cloned().unwrap_or(Value::Null),
                "url": shot.get("image").cloned().unwrap_or(Value::Null),
                "width": shot.get("width").cloned().unwrap_or(Value::Null),
                "height": shot.get("height").cloned().unwrap_or(Value::Null),
            })
        })
        .collect())
}

fn result_payload(game: &Value, shots: Vec<Value>) -> UpstreamData {
    let artworks: Vec<Value> = shots
        .iter()
        .filter_map(|shot| shot.get("url").cloned())
        .collect();
    json!({
        "game": {
            "id": game.get("id").cloned().unwrap_or(Value::Null),
            "slug": game.get("slug").cloned().unwrap_or(Value::Null),
            "name": game.get("name").cloned().unwrap_or(Value::Null),
            "released": game.get("released").cloned().unwrap_or(Value::Null),
            "background": game.get("background_image").cloned().unwrap_or(Value::Null),
        },
        "screenshots": shots,
        "artworks": artworks,
        "source": SOURCE_NOTE,
    })
}

fn game_name(game: &Value) -> String {
    game.get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn games_url(key: &str, params: &[(&str, &str)]) -> Url {
    let mut url = Url::parse(API_BASE).expect("static url");
    url.set_path("/api/games");
    url.query_pairs_mut().append_pair("key", key);
    for (name, value) in params {
        url.query_pairs_mut().append_pair(name, value);
    }
    url
}

fn is_invalid_page(err: &FetchError) -> bool {
    match err {
        FetchError::Status { status, body } => {
            *status == 404 || body.to_ascii_lowercase().contains("invalid page")
        }
        _ => false,
    }
}

async fn get(fetcher: &Fetcher, url: &Url) -> Result<Value, FetchError> {
    fetcher
        .get_json(
            url,
            &[("Accept".to_string(), "application/json".to_string())],
            &RetryPolicy::http(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn games_url_carries_key_and_params() {
        let url = games_url("secret", &[("page", "3"), ("page_size", "40")]);
        assert_eq!(url.path(), "/api/games");
        let query = url.query().unwrap();
        assert!(query.contains("key=secret"));
        assert!(query.contains("page=3"));
        assert!(query.contains("page_size=40"));
    }

    #[test]
    fn invalid_page_detection() {
        assert!(is_invalid_page(&FetchError::Status {
            status: 404,
            body: String::new(),
        }));
        assert!(is_invalid_page(&FetchError::Status {
            status: 400,
            body: "Invalid page.".to_string(),
        }));
        assert!(!is_invalid_page(&FetchError::Status {
            status: 500,
            body: "boom".to_string(),
        }));
        assert!(!is_invalid_page(&FetchError::Provider("x".to_string())));
    }

    #[test]
    fn payload_shape_carries_game_and_artworks() {
        let game = json!({
            "id": 42,
            "slug": "half-life",
            "name": "Half-Life",
            "released": "1998-11-19",
            "background_image": "https://media.rawg.io/bg.jpg",
        });
        let shots = vec![json!({"id": 1, "url": "https://media.rawg.io/s1.jpg"})];
        let payload = result_payload(&game, shots);
        assert_eq!(
            payload.pointer("/game/name").and_then(Value::as_str),
            Some("Half-Life")
        );
        assert_eq!(
            payload.pointer("/artworks/0").and_then(Value::as_str),
            Some("https://media.rawg.io/s1.jpg")
        );
        assert_eq!(
            payload.get("source").and_then(Value::as_str),
            Some(SOURCE_NOTE)
        );
    }
}
