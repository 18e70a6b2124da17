//! Configuration System
//!
//! Layered configuration: built-in defaults, the global file
//! (`~/.config/termforge/config.toml`), workspace files (`config/config.toml`,
//! `config/{TERMFORGE_ENV}.toml`) and `TERMFORGE__SECTION__KEY` environment variables.
//! Validation collects every problem instead of stopping at the first.

use crate::column::{ColumnDefinition, ColumnRegistry};
use crate::error::PipelineError;
use crate::job::{ProcessingMode, StartOptions};
use crate::logging::LoggingConfig;
use crate::model::PricingConfig;
use crate::orchestrator::OrchestratorSettings;
use crate::provider::{ModelsConfig, ProviderConfig};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

mod loader;
mod merge;
mod sources;

pub use loader::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Model name per tier
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Column definitions (`[[columns]]` tables)
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where responses are cached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Persistent, in the store database
    #[default]
    Sled,
    /// Process-local, optionally bounded
    Memory,
    Disabled,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled database holding terms, units, jobs and the persistent cache
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default)]
    pub cache_backend: CacheBackend,

    /// Entry bound for the memory cache
    #[serde(default)]
    pub cache_capacity: Option<usize>,

    /// Entry lifetime for the memory cache
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".termforge/store")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            cache_backend: CacheBackend::default(),
            cache_capacity: None,
            cache_ttl_secs: None,
        }
    }
}

/// Default run options plus orchestration limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_mode")]
    pub mode: ProcessingMode,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u8,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delay_between_batches_ms")]
    pub delay_between_batches_ms: u64,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default = "default_systemic_failure_min_batch")]
    pub systemic_failure_min_batch: usize,
    #[serde(default = "default_auth_probe_limit")]
    pub auth_probe_limit: usize,
    #[serde(default = "default_sample_feedback_limit")]
    pub sample_feedback_limit: usize,
    /// Per-term error records kept on a job snapshot; counters stay exact beyond it
    #[serde(default = "default_error_record_limit")]
    pub error_record_limit: usize,
    /// Provider calls in flight across all jobs; unbounded when unset
    #[serde(default)]
    pub shared_concurrency_limit: Option<usize>,
}

fn default_mode() -> ProcessingMode {
    ProcessingMode::FullPipeline
}

fn default_quality_threshold() -> u8 {
    7
}

fn default_batch_size() -> usize {
    10
}

fn default_delay_between_batches_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_systemic_failure_min_batch() -> usize {
    3
}

fn default_auth_probe_limit() -> usize {
    2
}

fn default_sample_feedback_limit() -> usize {
    5
}

fn default_error_record_limit() -> usize {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            quality_threshold: default_quality_threshold(),
            batch_size: default_batch_size(),
            delay_between_batches_ms: default_delay_between_batches_ms(),
            skip_existing: default_true(),
            systemic_failure_min_batch: default_systemic_failure_min_batch(),
            auth_probe_limit: default_auth_probe_limit(),
            sample_feedback_limit: default_sample_feedback_limit(),
            error_record_limit: default_error_record_limit(),
            shared_concurrency_limit: None,
        }
    }
}

impl PipelineConfig {
    /// Start options seeded from the configured defaults
    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            mode: self.mode,
            quality_threshold: self.quality_threshold,
            batch_size: self.batch_size,
            delay_between_batches_ms: self.delay_between_batches_ms,
            skip_existing: self.skip_existing,
            reverse_order: false,
            limit: None,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            default_mode: self.mode,
            systemic_failure_min_batch: self.systemic_failure_min_batch,
            auth_probe_limit: self.auth_probe_limit,
            sample_feedback_limit: self.sample_feedback_limit,
            error_record_limit: self.error_record_limit,
            shared_concurrency_limit: self.shared_concurrency_limit,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.start_options().validate().map_err(|e| e.to_string())?;
        if self.auth_probe_limit == 0 {
            return Err("auth_probe_limit must be at least 1".to_string());
        }
        if self.shared_concurrency_limit == Some(0) {
            return Err("shared_concurrency_limit must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Column(String, String),
    Pipeline(String),
    Retry(String),
    Pricing(String),
    Provider(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Column(id, msg) => write!(f, "Column '{}': {}", id, msg),
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Retry(msg) => write!(f, "Retry: {}", msg),
            ValidationError::Pricing(msg) => write!(f, "Pricing: {}", msg),
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ForgeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, column) in self.columns.iter().enumerate() {
            if let Err(e) = column.validate() {
                errors.push(ValidationError::Column(column.id.clone(), e));
            }
            if let Some(first) = seen.insert(column.id.as_str(), index) {
                errors.push(ValidationError::Column(
                    column.id.clone(),
                    format!("Duplicate column id (entries {} and {})", first, index),
                ));
            }
        }

        if let Err(e) = self.pipeline.validate() {
            errors.push(ValidationError::Pipeline(e));
        }
        if let Err(e) = self.retry.validate() {
            errors.push(ValidationError::Retry(e));
        }
        if let Err(e) = self.pricing.validate() {
            errors.push(ValidationError::Pricing(e));
        }
        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if self.storage.store_path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Store path cannot be empty".to_string(),
            ));
        }
        if self.storage.cache_capacity == Some(0) {
            errors.push(ValidationError::Storage(
                "cache_capacity must be at least 1 when set".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one configuration error.
    pub fn validated(self) -> Result<Self, PipelineError> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PipelineError::Configuration(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(self)
    }

    pub fn column_registry(&self) -> Result<ColumnRegistry, PipelineError> {
        ColumnRegistry::from_definitions(self.columns.iter().cloned())
    }
}
