//! Runtime configuration.
//!
//! Every field has a default, so the crawler runs without a config file. A
//! TOML file named by `CATALOG_CRAWLER_CONFIG` overrides the defaults, and
//! `CATALOG_PATH` overrides the catalog location on top of that.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const CONFIG_PATH_ENV: &str = "CATALOG_CRAWLER_CONFIG";
pub const CATALOG_PATH_ENV: &str = "CATALOG_PATH";

pub const PAGE_PLACEHOLDER: &str = "{page}";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid site base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub fetch: FetchConfig,
    pub crawl: CrawlConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
    pub ui: UiConfig,
}

impl Config {
    /// Loads configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let catalog_path = std::env::var_os(CATALOG_PATH_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref(), catalog_path)
    }

    pub fn load_from(
        file: Option<&Path>,
        catalog_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&contents)?
            }
            None => Self::default(),
        };

        if let Some(path) = catalog_path {
            config.catalog.path = path;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.site.resolve()?;
        if self.crawl.workers == 0 {
            return Err(ConfigError::Invalid("crawl.workers must be at least 1".to_string()));
        }
        if self.catalog.write_attempts == 0 {
            return Err(ConfigError::Invalid(
                "catalog.write_attempts must be at least 1".to_string(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Addresses and names that describe the source site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Listing page address with a 1-based `{page}` placeholder.
    pub listing_template: String,
    /// Name under which the site's episodes are stored on an entry.
    pub source_name: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bfzy5.tv".to_string(),
            listing_template: "https://bfzy5.tv/index.php/vod/type/id/41/page/{page}.html".to_string(),
            source_name: "暴风资源".to_string(),
        }
    }
}

impl SiteConfig {
    pub fn resolve(&self) -> Result<Site, ConfigError> {
        if !self.listing_template.contains(PAGE_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "site.listing_template must contain {PAGE_PLACEHOLDER}"
            )));
        }
        if self.source_name.trim().is_empty() {
            return Err(ConfigError::Invalid("site.source_name must not be empty".to_string()));
        }
        Ok(Site {
            base_url: Url::parse(&self.base_url)?,
            listing_template: self.listing_template.clone(),
            source_name: self.source_name.clone(),
        })
    }
}

/// A validated [`SiteConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub base_url: Url,
    pub listing_template: String,
    pub source_name: String,
}

impl Site {
    pub fn listing_url(&self, page: u32) -> String {
        self.listing_template.replace(PAGE_PLACEHOLDER, &page.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Bodies above this size are treated as a failed fetch
    pub max_response_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let headers = BTreeMap::from([
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language".to_string(), "zh-CN,zh;q=0.9,en;q=0.8".to_string()),
        ]);
        Self {
            timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers,
            max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Detail pages fetched concurrently
    pub workers: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self { workers: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
    /// Appended to the catalog file name to form the backup path
    pub backup_suffix: String,
    /// Total attempts for a write blocked by a lock or permission conflict
    pub write_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("metadata.json"),
            backup_suffix: ".bfzy.bak".to_string(),
            write_attempts: 5,
            retry_backoff_ms: 500,
        }
    }
}

impl CatalogConfig {
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(&self.backup_suffix);
        PathBuf::from(name)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Write logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Info,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Show the live terminal dashboard during a run
    pub dashboard: bool,
}
