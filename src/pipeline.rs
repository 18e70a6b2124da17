//! Phase executors
//!
//! Generation, evaluation and improvement each take one batch of terms and process
//! the batch concurrently. Every provider call goes through the same path: cache
//! lookup, then the retry policy, then response validation, then cache write. With a
//! shared concurrency budget, each attempt holds a permit for the provider call only,
//! and the call deadline starts once the permit is held. Per-term failures are
//! recorded on the tracker and returned in the batch report; they never abort the batch.

pub mod evaluation;
pub mod generation;
pub mod improvement;

pub use evaluation::{parse_evaluation, run_evaluation_batch, Evaluation};
pub use generation::run_generation_batch;
pub use improvement::run_improvement_batch;

use crate::cache::{CacheEntry, CacheKey, ResilientCache};
use crate::column::ColumnDefinition;
use crate::content::Term;
use crate::error::PipelineError;
use crate::job::{JobTracker, ProcessingMode};
use crate::model::ModelTier;
use crate::provider::CompletionService;
use crate::retry::RetryPolicy;
use crate::store::ContentUnitStore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Everything a phase executor needs for one job
#[derive(Clone)]
pub struct PhaseContext {
    pub column: Arc<ColumnDefinition>,
    pub model_tier: ModelTier,
    pub completion: Arc<dyn CompletionService>,
    pub cache: ResilientCache,
    pub units: Arc<dyn ContentUnitStore>,
    pub retry: RetryPolicy,
    pub tracker: Arc<JobTracker>,
    /// Concurrency budget shared with other jobs
    pub limiter: Option<Arc<Semaphore>>,
    pub quality_threshold: u8,
    pub mode: ProcessingMode,
}

/// A validated provider (or cache) response
#[derive(Debug, Clone)]
pub(crate) struct CallResult<T> {
    pub value: T,
    /// Zero when served from the cache
    pub cost: f64,
    /// Tier that actually produced the text
    pub tier: ModelTier,
    pub cached: bool,
}

impl PhaseContext {
    /// Run one prompt for `term_id` through cache, retry policy and validator.
    pub(crate) async fn call<T, V>(
        &self,
        term_id: &str,
        prompt: &str,
        validate: V,
    ) -> Result<CallResult<T>, PipelineError>
    where
        V: Fn(&str) -> Result<T, PipelineError>,
    {
        let key = CacheKey::compute(
            term_id,
            &self.column.id,
            self.column.prompt_version,
            self.model_tier,
            prompt,
        );

        if let Some(entry) = self.cache.get(&key) {
            match validate(&entry.text) {
                Ok(value) => {
                    self.tracker.record_cache_hit();
                    debug!(column_id = %self.column.id, term_id, "Cache hit");
                    return Ok(CallResult {
                        value,
                        cost: 0.0,
                        tier: entry.model_tier,
                        cached: true,
                    });
                }
                Err(err) => {
                    debug!(
                        column_id = %self.column.id,
                        term_id,
                        error = %err,
                        "Cached response no longer valid, calling provider"
                    );
                }
            }
        }

        let validate = &validate;
        let (value, text, cost, tier) = self
            .retry
            .run(self.model_tier, |attempt, tier| async move {
                let permit = match &self.limiter {
                    Some(limiter) => Some(limiter.acquire().await.map_err(|_| {
                        PipelineError::Transient("concurrency limiter closed".to_string())
                    })?),
                    None => None,
                };
                debug!(
                    column_id = %self.column.id,
                    term_id,
                    attempt,
                    model_tier = %tier,
                    "Calling completion service"
                );
                let completion = self
                    .retry
                    .timed(self.completion.complete(prompt, tier))
                    .await?;
                drop(permit);
                // Billed even when validation rejects the text below.
                self.tracker.record_ai_call(completion.cost_units);
                let value = validate(&completion.text)?;
                Ok::<_, PipelineError>((value, completion.text, completion.cost_units, tier))
            })
            .await?;

        self.cache.put(&key, &CacheEntry::new(text, cost, tier));
        Ok(CallResult {
            value,
            cost,
            tier,
            cached: false,
        })
    }

    /// Validator for generated and improved text
    pub(crate) fn content_validator(&self) -> impl Fn(&str) -> Result<String, PipelineError> {
        let min_chars = self.retry.min_content_chars();
        move |text: &str| {
            let trimmed = text.trim();
            let chars = trimmed.chars().count();
            if chars < min_chars {
                Err(PipelineError::EmptyResponse(chars))
            } else {
                Ok(trimmed.to_string())
            }
        }
    }
}

/// Result of processing one term in a batch
#[derive(Debug)]
pub enum UnitOutcome {
    /// Succeeded; belongs in the next phase's queue
    Advanced(Term),
    /// Succeeded but scored below threshold; belongs in the improvement queue
    Flagged(Term),
    /// Succeeded and needs nothing further from this job
    Settled(Term),
    Failed(Term, PipelineError),
}

/// Per-term outcomes of a batch, in completion order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn advanced(&self) -> Vec<Term> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                UnitOutcome::Advanced(term) => Some(term.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn flagged(&self) -> Vec<Term> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                UnitOutcome::Flagged(term) => Some(term.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Term, &PipelineError)> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Failed(term, err) => Some((term, err)),
            _ => None,
        })
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Error kind shared by every term of the batch, if the whole batch failed alike.
    pub fn uniform_failure_kind(&self) -> Option<&'static str> {
        let mut kinds = self.outcomes.iter().map(|o| match o {
            UnitOutcome::Failed(_, err) => Some(err.kind()),
            _ => None,
        });
        let first = kinds.next()??;
        kinds.all(|k| k == Some(first)).then_some(first)
    }
}
