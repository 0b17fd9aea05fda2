use anyhow::Result;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Process-wide configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Development mode skips basic auth entirely.
    pub development: bool,
    pub skip_auth: bool,
    /// Basic-auth credentials for the API surface, from a `USERS` JSON map.
    pub users: HashMap<String, String>,
    /// Overrides the request-derived origin used to absolutize markup URLs.
    pub public_origin: Option<String>,
    pub user_agent: String,
    pub max_in_flight_requests: usize,
    /// Bounding deadline around the post-data-fetch pipeline.
    pub request_deadline: Duration,
    pub upstream_timeout: Duration,
    pub use_browser_sessions: bool,
    pub browser_max_idle_sessions: usize,
    pub browser_sandbox: bool,
    pub fallback_image_base: String,
    pub nasa_api_key: String,
    pub unsplash_client_id: String,
    pub wallhaven_api_key: String,
    pub wallhaven_imgix_url: Option<String>,
    pub nytimes_api_key: String,
    pub rawg_api_key: String,
    pub weather_api_key: String,
    pub weather_location: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_u16("PORT", 8080),
            development: parse_bool("DEVELOPMENT", false),
            skip_auth: parse_bool("SKIP_AUTH", false),
            users: parse_users("USERS"),
            public_origin: env::var("PUBLIC_ORIGIN")
                .ok()
                .map(|origin| origin.trim_end_matches('/').to_string()),
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| concat!("inky-gateway/", env!("CARGO_PKG_VERSION")).to_string()),
            max_in_flight_requests: parse_usize("MAX_IN_FLIGHT_REQUESTS", 256),
            request_deadline: Duration::from_secs(parse_u64("REQUEST_DEADLINE_SECONDS", 40)),
            upstream_timeout: Duration::from_secs(parse_u64("UPSTREAM_TIMEOUT_SECONDS", 20)),
            use_browser_sessions: parse_bool("USE_BROWSER_SESSIONS", false),
            browser_max_idle_sessions: parse_usize("BROWSER_MAX_IDLE_SESSIONS", 2),
            browser_sandbox: parse_bool("BROWSER_SANDBOX", true),
            fallback_image_base: env::var("FALLBACK_IMAGE_BASE")
                .unwrap_or_else(|_| "https://picsum.photos".to_string()),
            nasa_api_key: env::var("NASA_API_KEY").unwrap_or_default(),
            unsplash_client_id: env::var("UNSPLASH_CLIENT_ID").unwrap_or_default(),
            wallhaven_api_key: env::var("WALLHAVEN_API_KEY").unwrap_or_default(),
            wallhaven_imgix_url: env::var("WALLHAVEN_IMGIX_URL")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            nytimes_api_key: env::var("NYTIMES_API_KEY").unwrap_or_default(),
            rawg_api_key: env::var("RAWG_API_KEY").unwrap_or_default(),
            weather_api_key: env::var("WEATHER_API_KEY").unwrap_or_default(),
            weather_location: env::var("WEATHER_LOCATION")
                .unwrap_or_else(|_| "Los Angeles,CA".to_string()),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            development: true,
            skip_auth: true,
            users: HashMap::new(),
            public_origin: None,
            user_agent: "inky-gateway/test".to_string(),
            max_in_flight_requests: 8,
            request_deadline: Duration::from_secs(5),
            upstream_timeout: Duration::from_secs(2),
            use_browser_sessions: false,
            browser_max_idle_sessions: 0,
            browser_sandbox: true,
            fallback_image_base: "https://picsum.photos".to_string(),
            nasa_api_key: String::new(),
            unsplash_client_id: String::new(),
            wallhaven_api_key: String::new(),
            wallhaven_imgix_url: None,
            nytimes_api_key: String::new(),
            rawg_api_key: String::new(),
            weather_api_key: String::new(),
            weather_location: "Los Angeles,CA".to_string(),
        }
    }
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// `USERS` arrives as a JSON object of username to password. Escaped quotes
/// from shell-mangled secrets are tolerated; anything unparsable yields an
/// empty map and auth refuses requests until it is fixed.
fn parse_users(key: &str) -> HashMap<String, String> {
    let Ok(raw) = env::var(key) else {
        return HashMap::new();
    };
    let cleaned = raw.trim().replace("\\\"", "\"");
    match serde_json::from_str::<HashMap<String, String>>(&cleaned) {
        Ok(users) => users,
        Err(err) => {
            warn!(error = %err, "USERS is not a valid JSON object; auth will reject requests");
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn with_env_lock<F: FnOnce()>(f: F) {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap();
        f();
    }

    fn set_env(key: &str, value: &str) {
        unsafe { env::set_var(key, value) }
    }

    fn clear_env(key: &str) {
        unsafe { env::remove_var(key) }
    }

    #[test]
    fn defaults_apply_without_environment() {
        with_env_lock(|| {
            for key in ["PORT", "USERS", "DEVELOPMENT", "FALLBACK_IMAGE_BASE"] {
                clear_env(key);
            }
            let config = Config::from_env().unwrap();
            assert_eq!(config.port, 8080);
            assert!(config.users.is_empty());
            assert!(!config.development);
            assert_eq!(config.fallback_image_base, "https://picsum.photos");
            assert_eq!(config.request_deadline, Duration::from_secs(40));
        });
    }

    #[test]
    fn users_json_parses_and_tolerates_escaped_quotes() {
        with_env_lock(|| {
            set_env("USERS", r#" {\"frame\": \"hunter2\"} "#);
            let config = Config::from_env().unwrap();
            assert_eq!(
                config.users.get("frame").map(String::as_str),
                Some("hunter2")
            );
            set_env("USERS", "not json");
            let config = Config::from_env().unwrap();
            assert!(config.users.is_empty());
            clear_env("USERS");
        });
    }

    #[test]
    fn booleans_accept_common_truthy_forms() {
        with_env_lock(|| {
            set_env("USE_BROWSER_SESSIONS", "TRUE");
            let config = Config::from_env().unwrap();
            assert!(config.use_browser_sessions);
            set_env("USE_BROWSER_SESSIONS", "0");
            let config = Config::from_env().unwrap();
            assert!(!config.use_browser_sessions);
            clear_env("USE_BROWSER_SESSIONS");
        });
    }

    #[test]
    fn blank_wallhaven_cdn_is_treated_as_absent() {
        with_env_lock(|| {
            set_env("WALLHAVEN_IMGIX_URL", "  ");
            let config = Config::from_env().unwrap();
            assert!(config.wallhaven_imgix_url.is_none());
            clear_env("WALLHAVEN_IMGIX_URL");
        });
    }
}
