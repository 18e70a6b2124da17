//! CLI route: single route table and run context. Dispatches to the orchestrator and presentation.

use crate::cache::{MemoryResponseCache, ResilientCache, SledResponseCache};
use crate::config::{CacheBackend, ConfigLoader, ForgeConfig};
use crate::content::Term;
use crate::error::{PipelineError, StorageError};
use crate::job::{ColumnJob, StartOptions};
use crate::model::{ModelSelector, ModelTier};
use crate::orchestrator::ColumnOrchestrator;
use crate::provider::{Completion, CompletionService, OpenAiCompletionService};
use crate::retry::RetryPolicy;
use crate::store::{SledContentStore, SledJobStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::parse::{Commands, TermsCommands};
use crate::cli::presentation::{
    format_estimate, format_job_summary, format_quality_text, format_status_table,
};

/// Runtime context for CLI execution: loaded config and the stores opened on it.
/// Built from workspace path and optional config path using ConfigLoader only.
pub struct RunContext {
    config: ForgeConfig,
    workspace_root: PathBuf,
    store: SledContentStore,
    job_store: Arc<SledJobStore>,
    cache: ResilientCache,
}

/// Completion stand-in for commands that never call the provider.
struct ProviderNotLoaded;

#[async_trait]
impl CompletionService for ProviderNotLoaded {
    async fn complete(&self, _prompt: &str, _tier: ModelTier) -> Result<Completion, PipelineError> {
        Err(PipelineError::Configuration(
            "provider is only loaded for run and resume".to_string(),
        ))
    }
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        let config = config.validated()?;

        let store_path = resolve_path(&workspace_root, &config.storage.store_path);
        std::fs::create_dir_all(&store_path).map_err(StorageError::IoError)?;
        let db = sled::open(&store_path).map_err(StorageError::from)?;

        let store = SledContentStore::new(db.clone())?;
        let job_store = Arc::new(SledJobStore::new(db.clone())?);
        let cache = match config.storage.cache_backend {
            CacheBackend::Sled => ResilientCache::new(Arc::new(SledResponseCache::new(&db)?)),
            CacheBackend::Memory => ResilientCache::new(Arc::new(MemoryResponseCache::with_limits(
                config.storage.cache_capacity,
                config.storage.cache_ttl_secs.map(Duration::from_secs),
            ))),
            CacheBackend::Disabled => ResilientCache::disabled(),
        };

        info!(
            store_path = %store_path.display(),
            columns = config.columns.len(),
            terms = store.term_count(),
            "Opened termforge store"
        );

        Ok(Self {
            config,
            workspace_root,
            store,
            job_store,
            cache,
        })
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Execute a command. Returns the text to print on success.
    pub fn execute(&self, command: &Commands) -> Result<String, PipelineError> {
        match command {
            Commands::Terms {
                command: TermsCommands::Import { path },
            } => self.handle_import(path),
            Commands::Estimate {
                column,
                no_skip_existing,
            } => {
                let orchestrator = self.orchestrator(Arc::new(ProviderNotLoaded))?;
                let estimate = orchestrator.estimate_cost(column, !no_skip_existing)?;
                Ok(format_estimate(column, &estimate))
            }
            Commands::Run {
                column,
                mode,
                threshold,
                batch_size,
                delay_ms,
                no_skip_existing,
                reverse,
                limit,
            } => {
                let mut options = self.config.pipeline.start_options();
                if let Some(mode) = mode {
                    options.mode = mode.parse()?;
                }
                if let Some(threshold) = threshold {
                    options.quality_threshold = *threshold;
                }
                if let Some(batch_size) = batch_size {
                    options.batch_size = *batch_size;
                }
                if let Some(delay_ms) = delay_ms {
                    options.delay_between_batches_ms = *delay_ms;
                }
                if *no_skip_existing {
                    options.skip_existing = false;
                }
                options.reverse_order = *reverse;
                options.limit = *limit;
                self.handle_run(column, options)
            }
            Commands::Resume { column } => self.handle_resume(column),
            Commands::Status { column, format } => {
                let orchestrator = self.orchestrator(Arc::new(ProviderNotLoaded))?;
                let jobs = match column {
                    Some(column_id) => vec![orchestrator
                        .status(column_id)
                        .ok_or_else(|| PipelineError::JobNotFound(column_id.clone()))?],
                    None => orchestrator.statuses(),
                };
                format_status_table(&jobs, format)
            }
            Commands::Quality { column, format } => {
                let orchestrator = self.orchestrator(Arc::new(ProviderNotLoaded))?;
                let summary = orchestrator.quality_summary(column)?;
                format_quality_text(column, &summary, format)
            }
        }
    }

    fn handle_import(&self, path: &Path) -> Result<String, PipelineError> {
        let path = resolve_path(&self.workspace_root, path);
        let raw = std::fs::read_to_string(&path).map_err(StorageError::IoError)?;
        let terms: Vec<Term> = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Configuration(format!("Invalid terms file {}: {}", path.display(), e))
        })?;
        if let Some(term) = terms.iter().find(|t| t.id.trim().is_empty()) {
            return Err(PipelineError::Configuration(format!(
                "Term '{}' has an empty id",
                term.name
            )));
        }
        let imported = self.store.import_terms(&terms)?;
        self.store.flush()?;
        info!(imported, path = %path.display(), "Imported terms");
        Ok(format!(
            "Imported {} terms ({} total)",
            imported,
            self.store.term_count()
        ))
    }

    fn handle_run(&self, column_id: &str, options: StartOptions) -> Result<String, PipelineError> {
        let orchestrator = self.orchestrator(self.completion_service()?)?;
        let rt = runtime()?;
        let job = rt.block_on(async {
            let outcome = orchestrator.start(column_id, options);
            if !outcome.success {
                return Err(PipelineError::Configuration(outcome.message));
            }
            info!(column_id, message = %outcome.message, "Job started");
            wait_or_pause(&orchestrator, column_id).await
        })?;
        self.store.flush()?;
        Ok(format_job_summary(&job))
    }

    fn handle_resume(&self, column_id: &str) -> Result<String, PipelineError> {
        let orchestrator = self.orchestrator(self.completion_service()?)?;
        let rt = runtime()?;
        let job = rt.block_on(async {
            let outcome = orchestrator.resume(column_id);
            if !outcome.success {
                return Err(PipelineError::InvalidTransition(outcome.message));
            }
            info!(column_id, message = %outcome.message, "Job resumed");
            wait_or_pause(&orchestrator, column_id).await
        })?;
        self.store.flush()?;
        Ok(format_job_summary(&job))
    }

    fn completion_service(&self) -> Result<Arc<dyn CompletionService>, PipelineError> {
        let service = OpenAiCompletionService::new(
            self.config.provider.clone(),
            self.config.models.clone(),
            self.config.pricing.clone(),
        )?;
        Ok(Arc::new(service))
    }

    /// Build an orchestrator over the opened stores and load persisted jobs into it.
    fn orchestrator(
        &self,
        completion: Arc<dyn CompletionService>,
    ) -> Result<ColumnOrchestrator, PipelineError> {
        let store = Arc::new(self.store.clone());
        let orchestrator = ColumnOrchestrator::builder(
            self.config.column_registry()?,
            store.clone(),
            store,
            self.job_store.clone(),
            completion,
        )
        .cache(self.cache.clone())
        .selector(ModelSelector::new(self.config.pricing.clone()))
        .retry_policy(RetryPolicy::from_config(&self.config.retry))
        .settings(self.config.pipeline.orchestrator_settings())
        .build();
        orchestrator.rehydrate()?;
        Ok(orchestrator)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Configuration(format!("Failed to create runtime: {}", e)))
}

/// Wait for the job to stop; Ctrl-C requests a pause and keeps waiting for the batch to drain.
async fn wait_or_pause(
    orchestrator: &ColumnOrchestrator,
    column_id: &str,
) -> Result<ColumnJob, PipelineError> {
    let mut waiter = {
        let orchestrator = orchestrator.clone();
        let column_id = column_id.to_string();
        tokio::spawn(async move { orchestrator.wait(&column_id).await })
    };

    let joined = tokio::select! {
        joined = &mut waiter => joined,
        _ = tokio::signal::ctrl_c() => {
            let outcome = orchestrator.pause(column_id);
            warn!(column_id, message = %outcome.message, "Interrupt received, pausing");
            waiter.await
        }
    };
    joined.map_err(|e| PipelineError::InvalidTransition(format!("job waiter failed: {}", e)))?
}

fn resolve_path(workspace_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace_root.join(path)
    }
}
