//! Shared test utilities for integration tests
//!
//! A keyed mock completion service, a column fixture, and orchestrator wiring with
//! fast retries and no inter-batch delay.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termforge::cache::{MemoryResponseCache, ResilientCache};
use termforge::column::{
    ColumnCategory, ColumnDefinition, ColumnRegistry, ComplexityTier, PromptTriplet,
};
use termforge::content::Term;
use termforge::error::PipelineError;
use termforge::job::{ProcessingMode, StartOptions};
use termforge::model::ModelTier;
use termforge::orchestrator::{ColumnOrchestrator, OrchestratorBuilder, OrchestratorSettings};
use termforge::provider::{Completion, CompletionService};
use termforge::retry::{RetryConfig, RetryPolicy};
use termforge::store::{ContentUnitStore, JobStore, TermRepository};
use tokio::sync::Semaphore;

pub const COLUMN: &str = "key_concepts";
pub const CALL_COST: f64 = 0.01;

pub fn column(id: &str) -> ColumnDefinition {
    ColumnDefinition {
        id: id.to_string(),
        display_name: "Key Concepts".to_string(),
        category: ColumnCategory::Essential,
        complexity: ComplexityTier::Simple,
        prompts: PromptTriplet {
            generative: "Write the {column} section for {term}.".to_string(),
            evaluative: "EVALUATE {term}: {content}".to_string(),
            improvement: "IMPROVE {term}: {content} FEEDBACK: {feedback}".to_string(),
        },
        estimated_tokens: 400,
        prompt_version: 1,
    }
}

/// `t1..tn` named from `names`, in id order.
pub fn terms(names: &[&str]) -> Vec<Term> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Term::new(format!("t{}", i + 1), *name))
        .collect()
}

pub fn options(mode: ProcessingMode) -> StartOptions {
    StartOptions {
        mode,
        quality_threshold: 7,
        batch_size: 2,
        delay_between_batches_ms: 0,
        skip_existing: true,
        reverse_order: false,
        limit: None,
    }
}

/// Completion service that answers by prompt shape and by which term name the prompt mentions.
#[derive(Default)]
pub struct KeyedCompletion {
    scores: HashMap<String, u8>,
    failing: HashSet<String>,
    reject_all: bool,
    gate: Option<Arc<Semaphore>>,
    latency: Option<Duration>,
    arrived: AtomicUsize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl KeyedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluation score for a term name (default 8)
    pub fn score(mut self, name: &str, score: u8) -> Self {
        self.scores.insert(name.to_string(), score);
        self
    }

    /// Generation for this term name always fails with a transient error
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Every call is rejected as unauthorized
    pub fn rejecting_all(mut self) -> Self {
        self.reject_all = true;
        self
    }

    /// Each call waits for a permit from `gate` before answering
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every call takes this long to answer
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Most calls ever being answered at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Calls that reached the service, including ones still waiting on the gate
    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::SeqCst)
    }

    /// Calls answered successfully
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn term_in<'a>(&self, prompt: &str, names: impl Iterator<Item = &'a String>) -> Option<String> {
        names.filter(|name| prompt.contains(name.as_str())).cloned().next()
    }
}

impl KeyedCompletion {
    async fn answer(&self, prompt: &str) -> Result<Completion, PipelineError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| PipelineError::Transient(e.to_string()))?;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.reject_all {
            return Err(PipelineError::Auth("401 invalid api key".to_string()));
        }

        let text = if prompt.starts_with("EVALUATE") {
            let score = self
                .term_in(prompt, self.scores.keys())
                .and_then(|name| self.scores.get(&name).copied())
                .unwrap_or(8);
            format!(r#"{{"score": {}, "feedback": "Needs a worked example."}}"#, score)
        } else if prompt.starts_with("IMPROVE") {
            format!("Improved: {}", prompt.trim_start_matches("IMPROVE "))
        } else {
            if self.term_in(prompt, self.failing.iter()).is_some() {
                return Err(PipelineError::Transient("upstream 503".to_string()));
            }
            format!("Generated reference content. {}", prompt)
        };

        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion::new(text, CALL_COST))
    }
}

#[async_trait]
impl CompletionService for KeyedCompletion {
    async fn complete(&self, prompt: &str, _tier: ModelTier) -> Result<Completion, PipelineError> {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.answer(prompt).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::from_config(&RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 1,
        call_timeout_ms: 5_000,
        ..RetryConfig::default()
    })
}

/// Builder wired to `column` with fast retries and default settings
pub fn builder_for<S>(
    column: ColumnDefinition,
    store: Arc<S>,
    job_store: Arc<dyn JobStore>,
    completion: Arc<dyn CompletionService>,
) -> OrchestratorBuilder
where
    S: TermRepository + ContentUnitStore + 'static,
{
    let registry = ColumnRegistry::from_definitions([column]).unwrap();
    ColumnOrchestrator::builder(registry, store.clone(), store, job_store, completion)
        .retry_policy(fast_retry())
        .settings(OrchestratorSettings::default())
}

pub fn orchestrator<S>(
    store: Arc<S>,
    job_store: Arc<dyn JobStore>,
    completion: Arc<dyn CompletionService>,
    cache: ResilientCache,
) -> ColumnOrchestrator
where
    S: TermRepository + ContentUnitStore + 'static,
{
    builder_for(column(COLUMN), store, job_store, completion)
        .cache(cache)
        .build()
}

pub fn memory_cache() -> ResilientCache {
    ResilientCache::new(Arc::new(MemoryResponseCache::new()))
}

/// Poll until `condition` holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
