//! Configuration for product retrieval.

use std::path::Path;
use std::time::Duration;

use eo_common::{AccessError, AccessResult};
use serde::{Deserialize, Serialize};

use storage::DEFAULT_USER_AGENT;

/// Roles fetched when the caller does not pass any.
pub const DEFAULT_ROLES: [&str; 2] = ["data", "data-mask"];

/// Configuration for [`crate::ProductAccess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeConfig {
    /// Upper bound on concurrently fetched assets.
    pub max_workers: usize,

    /// Overall deadline of one retrieval call, unbounded when unset.
    pub retrieval_deadline_secs: Option<u64>,

    /// Asset roles fetched by default.
    pub default_roles: Vec<String>,

    /// Delay between two order status checks.
    pub download_wait_secs: u64,

    /// Maximum time spent waiting for an order or download.
    pub download_timeout_secs: u64,

    /// Non-default object storage endpoint, scheme included.
    pub s3_endpoint: Option<String>,

    /// User agent sent with HTTP requests.
    pub user_agent: String,

    /// Ask the downloader to extract archives.
    pub extract_downloads: bool,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            retrieval_deadline_secs: None,
            default_roles: DEFAULT_ROLES.iter().map(|r| r.to_string()).collect(),
            download_wait_secs: 2 * 60,
            download_timeout_secs: 20 * 60,
            s3_endpoint: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extract_downloads: true,
        }
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl CubeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("EOCUBE_MAX_WORKERS") {
            if let Ok(n) = val.parse() {
                config.max_workers = n;
            }
        }

        if let Ok(val) = std::env::var("EOCUBE_RETRIEVAL_DEADLINE_SECS") {
            if let Ok(secs) = val.parse() {
                config.retrieval_deadline_secs = Some(secs);
            }
        }

        if let Ok(val) = std::env::var("EOCUBE_DEFAULT_ROLES") {
            config.default_roles = parse_roles(&val);
        }

        if let Ok(val) = std::env::var("EOCUBE_DOWNLOAD_WAIT_SECS") {
            if let Ok(secs) = val.parse() {
                config.download_wait_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("EOCUBE_DOWNLOAD_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.download_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("EOCUBE_S3_ENDPOINT") {
            if !val.is_empty() {
                config.s3_endpoint = Some(val);
            }
        }

        if let Ok(val) = std::env::var("EOCUBE_USER_AGENT") {
            config.user_agent = val;
        }

        if let Ok(val) = std::env::var("EOCUBE_EXTRACT_DOWNLOADS") {
            config.extract_downloads = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Load configuration from a YAML file. Missing fields keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> AccessResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents).map_err(|e| {
            AccessError::InvalidConfig(format!("{}: {}", path.display(), e))
        })
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(contents: &str) -> AccessResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| AccessError::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be > 0".to_string());
        }

        if self.retrieval_deadline_secs == Some(0) {
            return Err("retrieval_deadline_secs must be > 0 when set".to_string());
        }

        if self.download_timeout_secs < self.download_wait_secs {
            return Err("download_timeout_secs must be >= download_wait_secs".to_string());
        }

        if let Some(endpoint) = &self.s3_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("s3_endpoint must be an http(s) URL, got {}", endpoint));
            }
        }

        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".to_string());
        }

        Ok(())
    }

    pub fn retrieval_deadline(&self) -> Option<Duration> {
        self.retrieval_deadline_secs.map(Duration::from_secs)
    }

    pub fn download_wait(&self) -> Duration {
        Duration::from_secs(self.download_wait_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn parse_roles(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
