use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::extraction::{PipelineProviders, ServiceReader, StageProviders};
use crate::pipeline::transport::{Credential, Provider, ProviderError, RetryPolicy};

/// Application-level constants
pub const APP_NAME: &str = "fieldsheet";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_TITLE: &str = "Cellular Processor";
pub const HTTP_REFERER: &str = "http://localhost";

pub const DEFAULT_API_BASE: &str = "https://integrate.api.nvidia.com/v1";
pub const DEFAULT_VISION_MODEL: &str = "meta/llama-3.2-90b-vision-instruct";
pub const DEFAULT_REASONING_MODEL: &str = "deepseek-ai/deepseek-v3.2";
pub const DEFAULT_OCR_URL: &str = "https://ai.api.nvidia.com/v1/cv/nvidia/ocdrnet";
pub const DEFAULT_OCR_MODEL: &str = "nvidia/ocdrnet";

pub const FIRST_ATTEMPT_TIMEOUT_SECS: u64 = 60;
pub const SECOND_ATTEMPT_TIMEOUT_SECS: u64 = 120;
pub const RETRY_BACKOFF_SECS: u64 = 2;
pub const DEFAULT_PACING_MS: u64 = 1000;

/// Written into a marked cell whose expression cannot be resolved.
pub const UNRESOLVED_SENTINEL: &str = "NULL";
/// Marked cells are looked for in columns A..=P.
pub const MAPPING_MAX_COLUMN: u32 = 16;

pub const CONFIG_ENV: &str = "FIELDSHEET_CONFIG";
pub const API_KEY_ENV: &str = "FIELDSHEET_API_KEY";
pub const BASE_URL_ENV: &str = "FIELDSHEET_BASE_URL";

/// `RUST_LOG` fallback for the binary. Run log entries are printed in full
/// at the end of a run, so only their warnings are echoed live.
pub fn default_log_filter() -> String {
    format!("warn,{}=info,run=warn", env!("CARGO_CRATE_NAME"))
}

/// `~/.config/fieldsheet/config.toml` (platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config {}: {detail}", path.display())]
    Invalid { path: PathBuf, detail: String },

    #[error("No API key for the {0} pipeline (set {env} or api_key in the config file)", env = API_KEY_ENV)]
    MissingApiKey(&'static str),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

// ──────────────────────────────────────────────
// File format
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// One entry per attempt.
    pub timeouts_secs: Vec<u64>,
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeouts_secs: vec![FIRST_ATTEMPT_TIMEOUT_SECS, SECOND_ATTEMPT_TIMEOUT_SECS],
            backoff_secs: RETRY_BACKOFF_SECS,
        }
    }
}

/// Model pair for one category pipeline, with optional endpoint overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub vision_model: String,
    pub reasoning_model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            reasoning_model: DEFAULT_REASONING_MODEL.to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub service_reader: ServiceReader,
    pub ocr_url: String,
    pub ocr_model: String,
    pub pacing_ms: u64,
    /// Diagnostic dump directory; `FIELDSHEET_DUMP_DIR` takes precedence.
    pub dump_dir: Option<PathBuf>,
    pub retry: RetryConfig,
    pub service: PipelineConfig,
    pub speed: PipelineConfig,
    pub video: PipelineConfig,
    pub voice: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_API_BASE.to_string(),
            service_reader: ServiceReader::default(),
            ocr_url: DEFAULT_OCR_URL.to_string(),
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            pacing_ms: DEFAULT_PACING_MS,
            dump_dir: None,
            retry: RetryConfig::default(),
            service: PipelineConfig::default(),
            speed: PipelineConfig::default(),
            video: PipelineConfig::default(),
            voice: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `explicit`, else `FIELDSHEET_CONFIG`, else the default path
    /// when it exists; then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| default_config_path().filter(|p| p.is_file()));

        let mut config = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading config");
                Self::from_file(&path)?
            }
            None => {
                tracing::debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|detail| ConfigError::Invalid {
            path: path.to_path_buf(),
            detail: detail.into(),
        })?;
        Ok(config)
    }

    /// Values that parse but would leave the pipeline unable to run.
    fn validate(&self) -> Result<(), &'static str> {
        if self.retry.timeouts_secs.is_empty() {
            return Err("retry.timeouts_secs must list at least one attempt timeout");
        }
        if self.retry.timeouts_secs.contains(&0) {
            return Err("retry.timeouts_secs entries must be greater than zero");
        }
        Ok(())
    }

    /// Environment values win over the file; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(API_KEY_ENV) {
            self.api_key = Some(key);
        }
        if let Some(url) = non_empty(BASE_URL_ENV) {
            self.base_url = url;
        }
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeouts: self
                .retry
                .timeouts_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            backoff: Duration::from_secs(self.retry.backoff_secs),
        }
    }

    /// Build the four category pipelines. Fails if any provider would be
    /// missing a credential or has an invalid URL.
    pub fn providers(&self) -> Result<PipelineProviders, ConfigError> {
        let service = self.stage("service", &self.service)?;
        let service = match self.service_reader {
            ServiceReader::Vision => service,
            ServiceReader::Ocr => StageProviders {
                ocr: Some(Provider::new(
                    "service-ocr",
                    &self.ocr_url,
                    self.credential("service", &self.service)?,
                    &self.ocr_model,
                )?),
                ..service
            },
        };
        Ok(PipelineProviders {
            service,
            speed: self.stage("speed", &self.speed)?,
            video: self.stage("video", &self.video)?,
            voice: self.stage("voice", &self.voice)?,
            service_reader: self.service_reader,
        })
    }

    fn credential(&self, label: &'static str, pipeline: &PipelineConfig) -> Result<Credential, ConfigError> {
        pipeline
            .api_key
            .as_deref()
            .or(self.api_key.as_deref())
            .filter(|k| !k.trim().is_empty())
            .map(Credential::new)
            .ok_or(ConfigError::MissingApiKey(label))
    }

    fn stage(&self, label: &'static str, pipeline: &PipelineConfig) -> Result<StageProviders, ConfigError> {
        let base_url = pipeline.base_url.as_deref().unwrap_or(&self.base_url);
        Ok(StageProviders {
            vision: Provider::new(
                &format!("{label}-vision"),
                base_url,
                self.credential(label, pipeline)?,
                &pipeline.vision_model,
            )?,
            reasoning: Provider::new(
                &format!("{label}-reasoning"),
                base_url,
                self.credential(label, pipeline)?,
                &pipeline.reasoning_model,
            )?,
            ocr: None,
        })
    }
}
