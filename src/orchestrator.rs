//! Column batch orchestrator
//!
//! Drives one job per column through `generating → evaluating → improving →
//! completed`, batch by batch. Jobs live in an arena keyed by column id, so different
//! columns run side by side while a second job on the same column is rejected.
//!
//! Batch boundaries are the only suspension points: pause is checked there, the
//! checkpoint and job snapshot are persisted there, and the inter-batch delay is
//! applied there.

use crate::cache::ResilientCache;
use crate::column::{ColumnDefinition, ColumnRegistry};
use crate::content::Term;
use crate::error::PipelineError;
use crate::job::{
    ColumnJob, FeedbackSample, JobCheckpoint, JobStatus, JobTracker, PipelinePhase,
    ProcessingMode, QualityDistribution, StartOptions,
};
use crate::model::{CostEstimate, ModelSelector};
use crate::pipeline::{
    run_evaluation_batch, run_generation_batch, run_improvement_batch, BatchReport, PhaseContext,
    UnitOutcome,
};
use crate::provider::CompletionService;
use crate::retry::RetryPolicy;
use crate::store::{ContentUnitStore, JobStore, TermFilter, TermRepository};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Result of a control operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySummary {
    pub average_score: f64,
    pub distribution: QualityDistribution,
    pub sample_feedback: Vec<FeedbackSample>,
}

/// Orchestration knobs that are not per-run options
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Mode assumed by `estimate_cost`
    pub default_mode: ProcessingMode,
    /// A batch at least this large failing entirely with one error kind fails the job
    pub systemic_failure_min_batch: usize,
    /// Consecutive auth failures tolerated before the job fails
    pub auth_probe_limit: usize,
    pub sample_feedback_limit: usize,
    /// Error records kept on each job snapshot
    pub error_record_limit: usize,
    /// Provider calls allowed in flight across all jobs
    pub shared_concurrency_limit: Option<usize>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_mode: ProcessingMode::FullPipeline,
            systemic_failure_min_batch: 3,
            auth_probe_limit: 2,
            sample_feedback_limit: 5,
            error_record_limit: 100,
            shared_concurrency_limit: None,
        }
    }
}

struct JobEntry {
    tracker: Arc<JobTracker>,
    pause_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct OrchestratorInner {
    columns: ColumnRegistry,
    terms: Arc<dyn TermRepository>,
    units: Arc<dyn ContentUnitStore>,
    job_store: Arc<dyn JobStore>,
    completion: Arc<dyn CompletionService>,
    cache: ResilientCache,
    selector: ModelSelector,
    retry: RetryPolicy,
    settings: OrchestratorSettings,
    limiter: Option<Arc<Semaphore>>,
    jobs: RwLock<HashMap<String, JobEntry>>,
    /// Columns with a `start` in progress
    starting: Mutex<HashSet<String>>,
}

/// Holds a column in `starting` until dropped
struct StartReservation<'a> {
    inner: &'a OrchestratorInner,
    column_id: String,
}

impl<'a> StartReservation<'a> {
    fn acquire(inner: &'a OrchestratorInner, column_id: &str) -> Option<Self> {
        if !inner.starting.lock().insert(column_id.to_string()) {
            return None;
        }
        Some(Self {
            inner,
            column_id: column_id.to_string(),
        })
    }
}

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        self.inner.starting.lock().remove(&self.column_id);
    }
}

pub struct OrchestratorBuilder {
    columns: ColumnRegistry,
    terms: Arc<dyn TermRepository>,
    units: Arc<dyn ContentUnitStore>,
    job_store: Arc<dyn JobStore>,
    completion: Arc<dyn CompletionService>,
    cache: ResilientCache,
    selector: ModelSelector,
    retry: RetryPolicy,
    settings: OrchestratorSettings,
}

impl OrchestratorBuilder {
    pub fn cache(mut self, cache: ResilientCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> ColumnOrchestrator {
        let limiter = self
            .settings
            .shared_concurrency_limit
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));
        ColumnOrchestrator {
            inner: Arc::new(OrchestratorInner {
                columns: self.columns,
                terms: self.terms,
                units: self.units,
                job_store: self.job_store,
                completion: self.completion,
                cache: self.cache,
                selector: self.selector,
                retry: self.retry,
                settings: self.settings,
                limiter,
                jobs: RwLock::new(HashMap::new()),
                starting: Mutex::new(HashSet::new()),
            }),
        }
    }
}

/// Cheap to clone; clones share the same job arena.
#[derive(Clone)]
pub struct ColumnOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ColumnOrchestrator {
    pub fn builder(
        columns: ColumnRegistry,
        terms: Arc<dyn TermRepository>,
        units: Arc<dyn ContentUnitStore>,
        job_store: Arc<dyn JobStore>,
        completion: Arc<dyn CompletionService>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            columns,
            terms,
            units,
            job_store,
            completion,
            cache: ResilientCache::disabled(),
            selector: ModelSelector::default(),
            retry: RetryPolicy::default(),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn columns(&self) -> &ColumnRegistry {
        &self.inner.columns
    }

    /// Start a job for `column_id`. Must be called from within a tokio runtime.
    ///
    /// Configuration problems (unknown column, invalid options) are reported as an
    /// unsuccessful outcome and no job is created. Terms are selected without holding
    /// the job arena lock; the column is reserved meanwhile so a concurrent start on
    /// it is rejected.
    pub fn start(&self, column_id: &str, options: StartOptions) -> OperationOutcome {
        let column = match self.inner.columns.get(column_id) {
            Ok(column) => column.clone(),
            Err(err) => return OperationOutcome::rejected(err.to_string()),
        };
        if let Err(err) = options.validate() {
            return OperationOutcome::rejected(err.to_string());
        }

        let _reservation = {
            let jobs = self.inner.jobs.read();
            let active = jobs
                .get(column_id)
                .is_some_and(|entry| entry.tracker.status().is_active());
            match StartReservation::acquire(&self.inner, column_id) {
                Some(reservation) if !active => reservation,
                _ => {
                    return OperationOutcome::rejected(
                        PipelineError::JobConflict(column_id.to_string()).to_string(),
                    )
                }
            }
        };

        let terms = match self.inner.select_terms(column_id, &options) {
            Ok(terms) => terms,
            Err(err) => return OperationOutcome::rejected(err.to_string()),
        };
        let estimate = self
            .inner
            .selector
            .estimate_cost(terms.len(), &column, options.mode);

        let job = ColumnJob::new(
            column_id,
            options.mode,
            options.quality_threshold,
            terms.len(),
            estimate.estimated_cost,
        );
        let tracker = Arc::new(self.inner.new_tracker(job));
        let pause_requested = Arc::new(AtomicBool::new(false));

        if terms.is_empty() {
            tracker.set_status(JobStatus::Completed, None, "No terms to process");
            self.inner.persist_job(&tracker);
            self.inner.jobs.write().insert(
                column_id.to_string(),
                JobEntry {
                    tracker,
                    pause_requested,
                    handle: None,
                },
            );
            info!(column_id, "No terms to process, job completed immediately");
            return OperationOutcome::accepted(format!(
                "No terms to process for column '{}'",
                column_id
            ));
        }

        let term_count = terms.len();
        let mode = options.mode;
        tracker.set_status(
            JobStatus::Generating,
            Some(PipelinePhase::Generation),
            "Generating",
        );
        tracker.set_pending_units(term_count);
        let checkpoint = JobCheckpoint::new(column_id, options, terms);
        self.inner.persist(&tracker, &checkpoint);

        {
            let mut jobs = self.inner.jobs.write();
            let handle = self.spawn_job(column, &tracker, &pause_requested, checkpoint);
            jobs.insert(
                column_id.to_string(),
                JobEntry {
                    tracker,
                    pause_requested,
                    handle: Some(handle),
                },
            );
        }

        info!(
            column_id,
            terms = term_count,
            mode = %mode,
            model_tier = %estimate.model_tier,
            estimated_cost = estimate.estimated_cost,
            "Started column job"
        );
        OperationOutcome::accepted(format!(
            "Started {} job for column '{}' over {} terms (estimated cost {:.4})",
            mode, column_id, term_count, estimate.estimated_cost
        ))
    }

    /// Request a pause; honored at the next batch boundary.
    pub fn pause(&self, column_id: &str) -> OperationOutcome {
        let jobs = self.inner.jobs.read();
        let Some(entry) = jobs.get(column_id) else {
            return OperationOutcome::rejected(
                PipelineError::JobNotFound(column_id.to_string()).to_string(),
            );
        };
        let status = entry.tracker.status();
        if status == JobStatus::Paused {
            return OperationOutcome::rejected(format!(
                "Job for column '{}' is already paused",
                column_id
            ));
        }
        if !status.is_running() {
            return OperationOutcome::rejected(format!(
                "Job for column '{}' is not running ({})",
                column_id, status
            ));
        }
        if entry.pause_requested.swap(true, Ordering::SeqCst) {
            return OperationOutcome::accepted("Pause already requested");
        }
        info!(column_id, "Pause requested");
        OperationOutcome::accepted(format!(
            "Job for column '{}' will pause after the current batch",
            column_id
        ))
    }

    /// Continue a paused job from its checkpoint, or withdraw a pending pause request.
    pub fn resume(&self, column_id: &str) -> OperationOutcome {
        let mut jobs = self.inner.jobs.write();
        let Some(entry) = jobs.get_mut(column_id) else {
            return OperationOutcome::rejected(
                PipelineError::JobNotFound(column_id.to_string()).to_string(),
            );
        };

        let status = entry.tracker.status();
        if status.is_running() {
            if entry.pause_requested.swap(false, Ordering::SeqCst) {
                info!(column_id, "Pause request withdrawn");
                return OperationOutcome::accepted("Pause request withdrawn; job keeps running");
            }
            return OperationOutcome::rejected(format!(
                "Job for column '{}' is already running",
                column_id
            ));
        }
        if status != JobStatus::Paused {
            return OperationOutcome::rejected(format!(
                "Job for column '{}' is not paused ({})",
                column_id, status
            ));
        }

        let column = match self.inner.columns.get(column_id) {
            Ok(column) => column.clone(),
            Err(err) => return OperationOutcome::rejected(err.to_string()),
        };
        let checkpoint = match self.inner.job_store.load_checkpoint(column_id) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                return OperationOutcome::rejected(format!(
                    "No checkpoint stored for column '{}'",
                    column_id
                ))
            }
            Err(err) => return OperationOutcome::rejected(err.to_string()),
        };

        let remaining = checkpoint.pending_units();
        entry.pause_requested.store(false, Ordering::SeqCst);
        entry.tracker.set_status(
            checkpoint.phase.running_status(),
            Some(checkpoint.phase),
            "Resumed",
        );
        entry.tracker.set_pending_units(remaining);
        self.inner.persist_job(&entry.tracker);

        let handle = self.spawn_job(column, &entry.tracker, &entry.pause_requested, checkpoint);
        entry.handle = Some(handle);

        info!(column_id, remaining, "Resumed column job");
        OperationOutcome::accepted(format!(
            "Resumed column '{}' with {} units remaining",
            column_id, remaining
        ))
    }

    pub fn status(&self, column_id: &str) -> Option<ColumnJob> {
        self.inner
            .jobs
            .read()
            .get(column_id)
            .map(|entry| entry.tracker.snapshot())
    }

    pub fn statuses(&self) -> Vec<ColumnJob> {
        let mut jobs: Vec<ColumnJob> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|entry| entry.tracker.snapshot())
            .collect();
        jobs.sort_by(|a, b| a.column_id.cmp(&b.column_id));
        jobs
    }

    /// Estimate the cost of running `column_id` now, in the default mode.
    pub fn estimate_cost(
        &self,
        column_id: &str,
        skip_existing: bool,
    ) -> Result<CostEstimate, PipelineError> {
        let column = self.inner.columns.get(column_id)?;
        let options = StartOptions {
            mode: self.inner.settings.default_mode,
            skip_existing,
            ..StartOptions::default()
        };
        let terms = self.inner.select_terms(column_id, &options)?;
        Ok(self
            .inner
            .selector
            .estimate_cost(terms.len(), column, options.mode))
    }

    pub fn quality_summary(&self, column_id: &str) -> Result<QualitySummary, PipelineError> {
        let job = self
            .status(column_id)
            .ok_or_else(|| PipelineError::JobNotFound(column_id.to_string()))?;
        Ok(QualitySummary {
            average_score: job.average_quality_score,
            distribution: job.quality_distribution,
            sample_feedback: job.feedback_samples,
        })
    }

    /// Wait for the job's current run to stop (completed, failed or paused).
    pub async fn wait(&self, column_id: &str) -> Result<ColumnJob, PipelineError> {
        let handle = {
            let mut jobs = self.inner.jobs.write();
            let entry = jobs
                .get_mut(column_id)
                .ok_or_else(|| PipelineError::JobNotFound(column_id.to_string()))?;
            entry.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(column_id, error = %err, "Job task ended abnormally");
            }
        }
        self.status(column_id)
            .ok_or_else(|| PipelineError::JobNotFound(column_id.to_string()))
    }

    /// Load persisted jobs into the arena. Jobs a dead process left running come back
    /// as paused. Returns the number of jobs loaded.
    pub fn rehydrate(&self) -> Result<usize, PipelineError> {
        let interrupted = self.inner.job_store.mark_interrupted_jobs()?;
        let persisted = self.inner.job_store.list_jobs()?;

        let mut jobs = self.inner.jobs.write();
        let starting = self.inner.starting.lock();
        let mut loaded = 0usize;
        for job in persisted {
            // A reserved column is owned by its in-progress start
            if jobs.contains_key(&job.column_id) || starting.contains(&job.column_id) {
                continue;
            }
            let column_id = job.column_id.clone();
            jobs.insert(
                column_id,
                JobEntry {
                    tracker: Arc::new(self.inner.new_tracker(job)),
                    pause_requested: Arc::new(AtomicBool::new(false)),
                    handle: None,
                },
            );
            loaded += 1;
        }
        info!(loaded, interrupted, "Rehydrated persisted jobs");
        Ok(loaded)
    }

    fn spawn_job(
        &self,
        column: ColumnDefinition,
        tracker: &Arc<JobTracker>,
        pause_requested: &Arc<AtomicBool>,
        checkpoint: JobCheckpoint,
    ) -> JoinHandle<()> {
        let ctx = PhaseContext {
            model_tier: self.inner.selector.select_model(column.complexity),
            column: Arc::new(column),
            completion: Arc::clone(&self.inner.completion),
            cache: self.inner.cache.clone(),
            units: Arc::clone(&self.inner.units),
            retry: self.inner.retry.clone(),
            tracker: Arc::clone(tracker),
            limiter: self.inner.limiter.clone(),
            quality_threshold: checkpoint.options.quality_threshold,
            mode: checkpoint.options.mode,
        };
        let inner = Arc::clone(&self.inner);
        let pause_requested = Arc::clone(pause_requested);
        tokio::spawn(async move {
            inner.drive(ctx, pause_requested, checkpoint).await;
        })
    }
}

impl OrchestratorInner {
    fn new_tracker(&self, job: ColumnJob) -> JobTracker {
        JobTracker::new(job, self.settings.sample_feedback_limit)
            .with_error_limit(self.settings.error_record_limit)
    }

    fn select_terms(
        &self,
        column_id: &str,
        options: &StartOptions,
    ) -> Result<Vec<Term>, PipelineError> {
        let filter = TermFilter {
            reverse: options.reverse_order,
            ..TermFilter::default()
        };
        let mut selected = Vec::new();
        for term in self.terms.list_terms(&filter)? {
            if options.skip_existing && self.terms.has_existing_content(&term.id, column_id)? {
                continue;
            }
            selected.push(term);
            if options.limit.is_some_and(|limit| selected.len() >= limit) {
                break;
            }
        }
        Ok(selected)
    }

    async fn drive(
        &self,
        ctx: PhaseContext,
        pause_requested: Arc<AtomicBool>,
        mut checkpoint: JobCheckpoint,
    ) {
        let column_id = ctx.column.id.clone();
        let tracker = Arc::clone(&ctx.tracker);
        let delay = Duration::from_millis(checkpoint.options.delay_between_batches_ms);
        let batch_size = checkpoint.options.batch_size;
        let mut first_batch = true;
        let mut auth_streak = 0usize;

        loop {
            let phase = checkpoint.phase;
            if checkpoint.queue(phase).is_empty() {
                match next_phase(phase, ctx.mode) {
                    Some(next) => {
                        checkpoint.phase = next;
                        checkpoint.touch();
                        tracker.set_status(next.running_status(), Some(next), next.as_str());
                        self.persist(&tracker, &checkpoint);
                        info!(column_id = %column_id, phase = %next, "Entering phase");
                        continue;
                    }
                    None => {
                        self.complete(&column_id, &tracker);
                        return;
                    }
                }
            }

            if !first_batch && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if pause_requested.load(Ordering::SeqCst) {
                tracker.set_status(JobStatus::Paused, Some(phase), "Paused at batch boundary");
                self.persist(&tracker, &checkpoint);
                info!(
                    column_id = %column_id,
                    phase = %phase,
                    remaining = checkpoint.pending_units(),
                    "Job paused"
                );
                return;
            }
            first_batch = false;

            let batch = checkpoint.take_batch(batch_size);
            let batch_index = checkpoint.batches_completed + 1;
            let started = Instant::now();
            let report = match phase {
                PipelinePhase::Generation => run_generation_batch(&ctx, batch).await,
                PipelinePhase::Evaluation => run_evaluation_batch(&ctx, batch).await,
                PipelinePhase::Improvement => run_improvement_batch(&ctx, batch).await,
            };
            tracker.record_batch_timing(started.elapsed(), report.len());

            match phase {
                PipelinePhase::Generation => {
                    checkpoint.evaluation_pending.extend(report.advanced());
                    checkpoint.improvement_pending.extend(report.flagged());
                }
                PipelinePhase::Evaluation => {
                    checkpoint.improvement_pending.extend(report.flagged());
                }
                PipelinePhase::Improvement => {}
            }
            checkpoint.batches_completed = batch_index;
            checkpoint.touch();
            tracker.set_pending_units(checkpoint.pending_units());

            info!(
                column_id = %column_id,
                phase = %phase,
                batch = batch_index,
                units = report.len(),
                failed = report.failure_count(),
                "Batch finished"
            );

            if let Some(reason) = systemic_failure(&report, &mut auth_streak, &self.settings) {
                self.fail(&column_id, &tracker, phase, reason);
                return;
            }
            self.persist(&tracker, &checkpoint);
        }
    }

    fn complete(&self, column_id: &str, tracker: &JobTracker) {
        let job = tracker.snapshot();
        let errors = job.generation_errors + job.evaluation_errors + job.improvement_errors;
        let message = format!(
            "Completed: {} generated, {} evaluated, {} improved, {} finalized, {} errors",
            job.generated_count, job.evaluated_count, job.improved_count, job.finalized_count, errors
        );
        tracker.set_status(JobStatus::Completed, None, message);
        tracker.set_pending_units(0);
        self.persist_job(tracker);
        if let Err(err) = self.job_store.delete_checkpoint(column_id) {
            warn!(column_id, error = %err, "Failed to delete checkpoint");
        }
        info!(
            column_id,
            generated = job.generated_count,
            evaluated = job.evaluated_count,
            improved = job.improved_count,
            errors,
            actual_cost = job.actual_cost,
            "Job completed"
        );
    }

    fn fail(&self, column_id: &str, tracker: &JobTracker, phase: PipelinePhase, reason: String) {
        error!(column_id, phase = %phase, reason = %reason, "Job failed");
        tracker.set_status(JobStatus::Failed, Some(phase), reason);
        self.persist_job(tracker);
        if let Err(err) = self.job_store.delete_checkpoint(column_id) {
            warn!(column_id, error = %err, "Failed to delete checkpoint");
        }
    }

    fn persist(&self, tracker: &JobTracker, checkpoint: &JobCheckpoint) {
        if let Err(err) = self.job_store.save_checkpoint(checkpoint) {
            warn!(column_id = %checkpoint.column_id, error = %err, "Failed to persist checkpoint");
        }
        self.persist_job(tracker);
    }

    fn persist_job(&self, tracker: &JobTracker) {
        let job = tracker.snapshot();
        if let Err(err) = self.job_store.save_job(&job) {
            warn!(column_id = %job.column_id, error = %err, "Failed to persist job snapshot");
        }
    }
}

fn next_phase(current: PipelinePhase, mode: ProcessingMode) -> Option<PipelinePhase> {
    match current {
        PipelinePhase::Generation if mode.evaluates() => Some(PipelinePhase::Evaluation),
        PipelinePhase::Evaluation if mode.improves() => Some(PipelinePhase::Improvement),
        _ => None,
    }
}

/// Decide whether a batch shows the provider is unusable for the whole job.
fn systemic_failure(
    report: &BatchReport,
    auth_streak: &mut usize,
    settings: &OrchestratorSettings,
) -> Option<String> {
    let probe_limit = settings.auth_probe_limit.max(1);
    for outcome in &report.outcomes {
        match outcome {
            UnitOutcome::Failed(_, err) if err.is_systemic() => {
                *auth_streak += 1;
                if *auth_streak >= probe_limit {
                    return Some(format!(
                        "Completion service rejected {} consecutive calls: {}",
                        auth_streak, err
                    ));
                }
            }
            _ => *auth_streak = 0,
        }
    }
    if report.len() >= settings.systemic_failure_min_batch.max(1) {
        if let Some(kind) = report.uniform_failure_kind() {
            return Some(format!(
                "Every term in a batch of {} failed with {}",
                report.len(),
                kind
            ));
        }
    }
    None
}
