//! Environment-driven configuration
//!
//! Defaults match the published behavior; every knob can be overridden with
//! an environment variable. Proxy variables (`HTTP_PROXY`, `HTTPS_PROXY`,
//! `ALL_PROXY`, `NO_PROXY`) are honoured by the HTTP client itself.

use std::time::Duration;
use url::Url;

const DEFAULT_CACHE_TTL_HOURS: u64 = 24;
const DEFAULT_PROFILE_TTL_HOURS: u64 = 1;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_QUERY_LENGTH: usize = 500;
const DEFAULT_SERVICE: &str = "https://bsky.social";
const DEFAULT_APPVIEW: &str = "https://public.api.bsky.app";

#[derive(Debug, Clone)]
pub struct Config {
    /// TTL written to repository cache entries
    pub cache_ttl_hours: u64,
    /// Maximum acceptable age when serving profile lookups from cache
    pub profile_ttl_hours: u64,
    /// Connect/metadata timeout for every HTTP request
    pub request_timeout: Duration,
    /// Whole-body deadline for archive downloads
    pub download_timeout: Duration,
    /// Longest accepted search query, in bytes
    pub max_query_length: usize,
    /// Default PDS for password login
    pub default_service: Url,
    /// Public appview for unauthenticated feed/thread reads
    pub appview: Url,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            profile_ttl_hours: DEFAULT_PROFILE_TTL_HOURS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            default_service: Url::parse(DEFAULT_SERVICE).expect("static URL"),
            appview: Url::parse(DEFAULT_APPVIEW).expect("static URL"),
        }
    }
}

impl Config {
    /// Load configuration, applying environment overrides on top of the
    /// defaults. Unparseable values fall back rather than failing startup.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(hours) = env_parse::<u64>("CACHE_TTL_HOURS") {
            config.cache_ttl_hours = hours;
        }
        if let Some(hours) = env_parse::<u64>("PROFILE_TTL_HOURS") {
            config.profile_ttl_hours = hours;
        }
        if let Some(secs) = env_parse::<u64>("REQUEST_TIMEOUT") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DOWNLOAD_TIMEOUT") {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(len) = env_parse::<usize>("MAX_QUERY_LENGTH") {
            config.max_query_length = len;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
