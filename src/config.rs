use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for environment variable {key}")]
    Invalid { key: &'static str, value: String },
}

/// Service configuration, read once at startup and handed to constructors.
#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_db_name: String,
    pub bind_addr: String,
    pub crawl: CrawlSettings,
}

/// Knobs for a single crawl and its fetcher.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub max_depth: usize,
    pub concurrency: usize,
    /// Overall per-crawl deadline; `None` lets a crawl run until the frontier drains.
    pub deadline: Option<Duration>,
    pub fetch_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        CrawlSettings {
            max_depth: 2,
            concurrency: 8,
            deadline: Some(Duration::from_secs(120)),
            fetch_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv().ok(); // Load .env file if present
        let defaults = CrawlSettings::default();

        let deadline_secs: u64 = parse_env_or("CRAWL_DEADLINE_SECS", 120)?;
        let crawl = CrawlSettings {
            max_depth: parse_env_or("CRAWL_MAX_DEPTH", defaults.max_depth)?,
            concurrency: parse_env_or("CRAWL_CONCURRENCY", defaults.concurrency)?.max(1),
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            fetch_timeout: Duration::from_secs(parse_env_or("FETCH_TIMEOUT_SECS", 20)?),
            max_retries: parse_env_or("FETCH_MAX_RETRIES", defaults.max_retries)?,
            ..defaults
        };

        Ok(Config {
            mongo_uri: get_env("MONGO_URI")?,
            mongo_db_name: get_env_or_default("MONGO_DB_NAME", "chatbot_db"),
            bind_addr: get_env_or_default("BIND_ADDR", "0.0.0.0:8002"),
            crawl,
        })
    }
}

fn get_env(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
