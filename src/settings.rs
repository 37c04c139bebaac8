use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::error::Result;

const ENV_PREFIX: &str = "HN_LINKS";

pub const DEFAULT_BASE_URL: &str = "https://news.ycombinator.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Runtime settings. Every field can be overridden from `HN_LINKS_*`
/// environment variables (`HN_LINKS_POST_ID`, `HN_LINKS_PORT`, ...); the
/// store path also honours a bare `DB_FILE`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
    #[serde(default = "default_post_id")]
    pub post_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
    #[serde(default = "default_scrape_interval_secs")]
    pub scrape_interval_secs: u64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_db_file() -> PathBuf {
    PathBuf::from("database/hn_links.db")
}

fn default_post_id() -> String {
    "46618714".into()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_per_page() -> usize {
    50
}

fn default_scrape_interval_secs() -> u64 {
    3600
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
            post_id: default_post_id(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            per_page: default_per_page(),
            scrape_interval_secs: default_scrape_interval_secs(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Settings {
    /// Load defaults overlaid with the process environment.
    pub fn load() -> Result<Self> {
        Self::from_source(
            Environment::with_prefix(ENV_PREFIX),
            std::env::var("DB_FILE").ok(),
        )
    }

    fn from_source(env: Environment, db_file: Option<String>) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(env)
            .set_override_option("db_file", db_file)?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.per_page == 0 {
            return Err(ConfigError::Message("per_page must be at least 1".into()));
        }
        if self.scrape_interval_secs == 0 {
            return Err(ConfigError::Message(
                "scrape_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }
}

pub fn item_url(base_url: &str, id: &str) -> String {
    format!("{}/item?id={}", base_url.trim_end_matches('/'), id)
}
