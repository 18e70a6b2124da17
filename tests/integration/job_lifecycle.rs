//! Job control: pause, resume, conflicts, shared budgets and rejected starts

use super::test_utils::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termforge::cache::ResilientCache;
use termforge::column::ColumnRegistry;
use termforge::content::{ProcessingPhase, Term};
use termforge::error::StorageError;
use termforge::job::{JobStatus, PipelinePhase, ProcessingMode};
use termforge::orchestrator::{ColumnOrchestrator, OrchestratorSettings};
use termforge::retry::{RetryConfig, RetryPolicy};
use termforge::store::{
    ContentUnitStore, InMemoryContentStore, InMemoryJobStore, JobStore, TermFilter,
    TermRepository,
};
use tokio::sync::Semaphore;

const NAMES: [&str; 6] = ["Alpha", "Beta", "Gamma", "Delta", "Epsilon", "Zeta"];

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_and_resumed_run_matches_uninterrupted_run() {
    // Uninterrupted baseline
    let baseline_store = Arc::new(InMemoryContentStore::with_terms(terms(&NAMES)));
    let baseline_orch = orchestrator(
        baseline_store,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new().score("Beta", 4)),
        ResilientCache::disabled(),
    );
    assert!(baseline_orch
        .start(COLUMN, options(ProcessingMode::FullPipeline))
        .success);
    let baseline = baseline_orch.wait(COLUMN).await.unwrap();
    assert_eq!(baseline.status, JobStatus::Completed);

    // Same corpus, paused during the first batch
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&NAMES)));
    let job_store = Arc::new(InMemoryJobStore::new());
    let completion = Arc::new(KeyedCompletion::new().score("Beta", 4).gated(gate.clone()));
    let orch = orchestrator(
        store,
        job_store.clone(),
        completion.clone(),
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    assert!(eventually(|| completion.arrived() == 2).await);

    let pause = orch.pause(COLUMN);
    assert!(pause.success, "{}", pause.message);
    assert_eq!(orch.pause(COLUMN).message, "Pause already requested");

    gate.add_permits(2);
    let paused = orch.wait(COLUMN).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.generated_count, 2);
    assert!(paused.processed_terms < paused.total_terms);
    let checkpoint = job_store.load_checkpoint(COLUMN).unwrap().unwrap();
    assert_eq!(checkpoint.generation_pending.len(), 4);
    assert_eq!(checkpoint.evaluation_pending.len(), 2);

    // A paused job still blocks a new start on the same column
    assert!(!orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);

    gate.add_permits(1000);
    let resume = orch.resume(COLUMN);
    assert!(resume.success, "{}", resume.message);
    let resumed = orch.wait(COLUMN).await.unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.generated_count, baseline.generated_count);
    assert_eq!(resumed.evaluated_count, baseline.evaluated_count);
    assert_eq!(resumed.improved_count, baseline.improved_count);
    assert_eq!(resumed.finalized_count, baseline.finalized_count);
    assert_eq!(resumed.low_quality_count, baseline.low_quality_count);
    assert_eq!(resumed.ai_calls, baseline.ai_calls);
    assert!((resumed.actual_cost - baseline.actual_cost).abs() < 1e-9);
    assert!(job_store.load_checkpoint(COLUMN).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_on_active_column_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha", "Beta"])));
    let completion = Arc::new(KeyedCompletion::new().gated(gate.clone()));
    let orch = orchestrator(
        store,
        Arc::new(InMemoryJobStore::new()),
        completion,
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateOnly)).success);
    let conflict = orch.start(COLUMN, options(ProcessingMode::GenerateOnly));
    assert!(!conflict.success);
    assert!(conflict.message.contains("already active"));

    gate.add_permits(1000);
    let job = orch.wait(COLUMN).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 2);
}

#[tokio::test]
async fn configuration_errors_create_no_job() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha"])));
    let job_store = Arc::new(InMemoryJobStore::new());
    let orch = orchestrator(
        store,
        job_store.clone(),
        Arc::new(KeyedCompletion::new()),
        ResilientCache::disabled(),
    );

    let unknown = orch.start("no_such_column", options(ProcessingMode::FullPipeline));
    assert!(!unknown.success);
    assert!(unknown.message.contains("no_such_column"));
    assert!(orch.status("no_such_column").is_none());

    let mut invalid = options(ProcessingMode::FullPipeline);
    invalid.quality_threshold = 11;
    let rejected = orch.start(COLUMN, invalid);
    assert!(!rejected.success);
    assert!(orch.status(COLUMN).is_none());
    assert!(job_store.list_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn control_operations_on_unknown_or_idle_jobs_fail() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha"])));
    let orch = orchestrator(
        store,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new()),
        ResilientCache::disabled(),
    );

    assert!(!orch.pause(COLUMN).success);
    assert!(!orch.resume(COLUMN).success);
    assert!(orch.quality_summary(COLUMN).is_err());

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateOnly)).success);
    let job = orch.wait(COLUMN).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let pause = orch.pause(COLUMN);
    assert!(!pause.success);
    assert!(pause.message.contains("not running"));
    assert!(!orch.resume(COLUMN).success);
}

#[tokio::test]
async fn quality_summary_reports_scores_and_feedback() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&[
        "Alpha", "Beta", "Gamma",
    ])));
    let orch = orchestrator(
        store,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(
            KeyedCompletion::new()
                .score("Alpha", 10)
                .score("Beta", 2)
                .score("Gamma", 6),
        ),
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateEvaluate)).success);
    orch.wait(COLUMN).await.unwrap();

    let summary = orch.quality_summary(COLUMN).unwrap();
    assert!((summary.average_score - 6.0).abs() < 1e-9);
    assert_eq!(summary.distribution.excellent, 1);
    assert_eq!(summary.distribution.needs_work, 1);
    assert_eq!(summary.distribution.poor, 1);
    assert_eq!(summary.sample_feedback.len(), 3);
    assert!(summary
        .sample_feedback
        .iter()
        .any(|sample| sample.term_id == "t2" && sample.score == 2));
}

#[tokio::test]
async fn statuses_list_every_column_job() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha"])));
    let orch = orchestrator(
        store,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new()),
        ResilientCache::disabled(),
    );
    assert!(orch.statuses().is_empty());

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateOnly)).success);
    orch.wait(COLUMN).await.unwrap();

    let statuses = orch.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].column_id, COLUMN);

    let estimate = orch.estimate_cost(COLUMN, false).unwrap();
    assert_eq!(estimate.term_count, 1);
    assert_eq!(orch.estimate_cost(COLUMN, true).unwrap().term_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_is_honored_at_an_evaluation_batch_boundary() {
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&NAMES[..4])));
    let job_store = Arc::new(InMemoryJobStore::new());
    let completion = Arc::new(KeyedCompletion::new().score("Beta", 4).gated(gate.clone()));
    let orch = orchestrator(
        store,
        job_store.clone(),
        completion.clone(),
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    gate.add_permits(4);
    // Both generation batches done, first evaluation batch waiting on the gate
    assert!(eventually(|| completion.arrived() == 6).await);
    assert!(orch.pause(COLUMN).success);
    gate.add_permits(2);

    let paused = orch.wait(COLUMN).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.current_phase, Some(PipelinePhase::Evaluation));
    assert_eq!(paused.generated_count, 4);
    assert_eq!(paused.evaluated_count, 2);
    let checkpoint = job_store.load_checkpoint(COLUMN).unwrap().unwrap();
    assert_eq!(checkpoint.phase, PipelinePhase::Evaluation);
    assert!(checkpoint.generation_pending.is_empty());
    assert_eq!(checkpoint.evaluation_pending.len(), 2);
    assert_eq!(checkpoint.improvement_pending.len(), 1);

    gate.add_permits(1000);
    assert!(orch.resume(COLUMN).success);
    let done = orch.wait(COLUMN).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.evaluated_count, 4);
    assert_eq!(done.improved_count, 1);
    assert_eq!(done.finalized_count, 4);
    assert_eq!(completion.calls(), 9);
    assert!(job_store.load_checkpoint(COLUMN).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_is_honored_at_an_improvement_batch_boundary() {
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&NAMES[..4])));
    let job_store = Arc::new(InMemoryJobStore::new());
    let completion = NAMES[..4]
        .iter()
        .fold(KeyedCompletion::new(), |c, name| c.score(name, 3))
        .gated(gate.clone());
    let completion = Arc::new(completion);
    let orch = orchestrator(
        store.clone(),
        job_store.clone(),
        completion.clone(),
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    gate.add_permits(8);
    assert!(eventually(|| completion.arrived() == 10).await);
    assert!(orch.pause(COLUMN).success);
    gate.add_permits(2);

    let paused = orch.wait(COLUMN).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.current_phase, Some(PipelinePhase::Improvement));
    assert_eq!(paused.improved_count, 2);
    let checkpoint = job_store.load_checkpoint(COLUMN).unwrap().unwrap();
    assert_eq!(checkpoint.phase, PipelinePhase::Improvement);
    assert_eq!(checkpoint.improvement_pending.len(), 2);
    let waiting = &checkpoint.improvement_pending[0];
    assert_eq!(
        store.read_unit(&waiting.id, COLUMN).unwrap().unwrap().processing_phase,
        ProcessingPhase::Evaluated
    );

    gate.add_permits(1000);
    assert!(orch.resume(COLUMN).success);
    let done = orch.wait(COLUMN).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.improved_count, 4);
    assert_eq!(done.finalized_count, 4);
    assert!(store
        .list_units(COLUMN)
        .unwrap()
        .iter()
        .all(|unit| unit.processing_phase == ProcessingPhase::Final));
}

#[tokio::test]
async fn shared_budget_queueing_does_not_count_against_the_call_deadline() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&NAMES[..4])));
    let completion = Arc::new(KeyedCompletion::new().latency(Duration::from_millis(80)));
    let orch = builder_for(
        column(COLUMN),
        store,
        Arc::new(InMemoryJobStore::new()),
        completion.clone(),
    )
    .retry_policy(RetryPolicy::from_config(&RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 1,
        call_timeout_ms: 150,
        ..RetryConfig::default()
    }))
    .settings(OrchestratorSettings {
        shared_concurrency_limit: Some(1),
        ..OrchestratorSettings::default()
    })
    .build();

    let mut opts = options(ProcessingMode::GenerateOnly);
    opts.batch_size = 4;
    assert!(orch.start(COLUMN, opts).success);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 4);
    assert_eq!(job.generation_errors, 0);
    assert_eq!(completion.arrived(), 4);
    assert_eq!(completion.max_in_flight(), 1);
}

#[tokio::test]
async fn finished_units_never_move_back_under_a_new_prompt_version() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha", "Beta"])));
    let first = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new()),
        ResilientCache::disabled(),
    );
    assert!(first.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    assert_eq!(first.wait(COLUMN).await.unwrap().finalized_count, 2);
    let before = store.list_units(COLUMN).unwrap();

    let mut revised = column(COLUMN);
    revised.prompt_version = 2;
    let completion = Arc::new(KeyedCompletion::new());
    let second = builder_for(
        revised,
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        completion.clone(),
    )
    .build();
    let mut opts = options(ProcessingMode::GenerateOnly);
    opts.skip_existing = false;
    assert!(second.start(COLUMN, opts).success);
    let job = second.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 0);
    assert_eq!(job.generation_errors, 2);
    assert!(job.errors.iter().all(|e| e.kind == "invalid_transition"));
    assert_eq!(completion.arrived(), 0);
    assert_eq!(store.list_units(COLUMN).unwrap(), before);
    assert!(before
        .iter()
        .all(|unit| unit.processing_phase == ProcessingPhase::Final && unit.prompt_version == 1));
}

/// Term repository whose listing blocks until released
struct HeldTerms {
    inner: Arc<InMemoryContentStore>,
    listing: AtomicBool,
    release: AtomicBool,
}

impl TermRepository for HeldTerms {
    fn list_terms(&self, filter: &TermFilter) -> Result<Vec<Term>, StorageError> {
        self.listing.store(true, Ordering::SeqCst);
        while !self.release.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.inner.list_terms(filter)
    }

    fn has_existing_content(&self, term_id: &str, column_id: &str) -> Result<bool, StorageError> {
        self.inner.has_existing_content(term_id, column_id)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn term_selection_does_not_block_status_reads() {
    let units = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha", "Beta"])));
    let held = Arc::new(HeldTerms {
        inner: units.clone(),
        listing: AtomicBool::new(false),
        release: AtomicBool::new(false),
    });
    let registry = ColumnRegistry::from_definitions([column(COLUMN)]).unwrap();
    let orch = ColumnOrchestrator::builder(
        registry,
        held.clone(),
        units,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new()),
    )
    .retry_policy(fast_retry())
    .build();

    let starter = orch.clone();
    let start = tokio::task::spawn_blocking(move || {
        starter.start(COLUMN, options(ProcessingMode::GenerateOnly))
    });
    assert!(eventually(|| held.listing.load(Ordering::SeqCst)).await);

    // Arena stays readable while the first start is still selecting terms
    assert!(orch.statuses().is_empty());
    assert!(orch.status(COLUMN).is_none());
    let racing = orch.start(COLUMN, options(ProcessingMode::GenerateOnly));
    assert!(!racing.success);
    assert!(racing.message.contains("already active"));

    held.release.store(true, Ordering::SeqCst);
    assert!(start.await.unwrap().success);
    let job = orch.wait(COLUMN).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 2);
}
