use serde::Deserialize;
use std::path::PathBuf;

/// Server configuration, read from `HAL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Host to bind (e.g. "localhost", "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional path prefix every route is served under. Must start with '/'.
    #[serde(default, rename = "basepath")]
    pub base_path: Option<String>,

    /// Job store document
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Directory pipeline output is written to and served from
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Pipelines allowed to run at once; further jobs wait
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// In-progress jobs older than this are failed by the reaper. 0 disables it.
    #[serde(default)]
    pub stale_job_timeout_secs: u64,

    /// OpenAI API key for question labelling and query generation
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// Chat completions endpoint
    #[serde(default = "default_openai_url")]
    pub openai_url: String,

    /// Chat completions model
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Nominatim search endpoint
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,

    /// Overpass interpreter endpoint
    #[serde(default = "default_overpass_url")]
    pub overpass_url: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_store_path() -> PathBuf {
    PathBuf::from("cache.json")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_max_concurrent_jobs() -> usize {
    16
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org/search.php".to_string()
}

fn default_overpass_url() -> String {
    "https://overpass-api.de/api/interpreter".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: None,
            store_path: default_store_path(),
            results_dir: default_results_dir(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            stale_job_timeout_secs: 0,
            openai_api_key: None,
            openai_url: default_openai_url(),
            openai_model: default_openai_model(),
            nominatim_url: default_nominatim_url(),
            overpass_url: default_overpass_url(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::prefixed("HAL_").from_env()?;
        config.validate()
    }

    /// Normalize and check values envy cannot.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.base_path = match self.base_path.take() {
            None => None,
            Some(path) if path.is_empty() => None,
            Some(path) if !path.starts_with('/') => return Err(ConfigError::BasePath(path)),
            Some(path) => {
                let trimmed = path.trim_end_matches('/');
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        };

        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::MaxConcurrentJobs);
        }

        Ok(self)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("HAL_BASEPATH={0}. It must begin with the '/' char.")]
    BasePath(String),

    #[error("HAL_MAX_CONCURRENT_JOBS must be at least 1")]
    MaxConcurrentJobs,
}
