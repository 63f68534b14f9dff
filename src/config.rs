//! Runtime configuration read from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::indicators::registry::{Registry, RegistryError};
use crate::infra::api::ApiSource;
use crate::infra::files::FileSource;
use crate::services::source::{HierarchyProvider, SubmissionSource};

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TREND_LIMIT: usize = 5;
const DEFAULT_LOG_FILE_PATH: &str = "logs/school_indicators.log";

/// Where submissions and the hierarchy come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Api { url: String, token: Option<String> },
    Files { dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub fetch_timeout: Duration,
    pub registry_path: Option<PathBuf>,
    pub trend_limit: usize,
    pub log_file_path: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("no data source configured: set INDICATORS_API_URL or INDICATORS_DATA_DIR")]
    NoSource,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads every setting through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let fetch_timeout = Duration::from_secs(positive(
            "INDICATORS_FETCH_TIMEOUT_SECS",
            get("INDICATORS_FETCH_TIMEOUT_SECS"),
            DEFAULT_FETCH_TIMEOUT_SECS,
        )?);
        let trend_limit = positive(
            "INDICATORS_TREND_LIMIT",
            get("INDICATORS_TREND_LIMIT"),
            DEFAULT_TREND_LIMIT as u64,
        )? as usize;

        Ok(Self {
            data_dir: get("INDICATORS_DATA_DIR").map(PathBuf::from),
            api_url: get("INDICATORS_API_URL"),
            api_token: get("INDICATORS_API_TOKEN"),
            fetch_timeout,
            registry_path: get("INDICATORS_REGISTRY_PATH").map(PathBuf::from),
            trend_limit,
            log_file_path: get("LOG_FILE_PATH").unwrap_or_else(|| DEFAULT_LOG_FILE_PATH.to_string()),
        })
    }

    /// The API wins when both an API URL and a data directory are set.
    pub fn source(&self) -> Result<SourceConfig, ConfigError> {
        match (&self.api_url, &self.data_dir) {
            (Some(url), _) => Ok(SourceConfig::Api {
                url: url.clone(),
                token: self.api_token.clone(),
            }),
            (None, Some(dir)) => Ok(SourceConfig::Files { dir: dir.clone() }),
            (None, None) => Err(ConfigError::NoSource),
        }
    }

    /// Builds the configured source, used both for submissions and for the
    /// hierarchy.
    pub fn connect(
        &self,
    ) -> anyhow::Result<(Arc<dyn SubmissionSource>, Arc<dyn HierarchyProvider>)> {
        match self.source()? {
            SourceConfig::Api { url, token } => {
                let api = Arc::new(ApiSource::new(url, token, self.fetch_timeout)?);
                let submissions: Arc<dyn SubmissionSource> = api.clone();
                let hierarchy: Arc<dyn HierarchyProvider> = api;
                Ok((submissions, hierarchy))
            }
            SourceConfig::Files { dir } => {
                let files = Arc::new(FileSource::new(dir));
                let submissions: Arc<dyn SubmissionSource> = files.clone();
                let hierarchy: Arc<dyn HierarchyProvider> = files;
                Ok((submissions, hierarchy))
            }
        }
    }

    /// The formula set at `registry_path`, or the built-in catalogue.
    pub fn registry(&self) -> Result<Registry, RegistryError> {
        match &self.registry_path {
            Some(path) => Registry::load(path),
            None => Ok(Registry::builtin()),
        }
    }
}

fn positive(var: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(number) if number > 0 => Ok(number),
        _ => Err(ConfigError::InvalidNumber { var, value }),
    }
}
