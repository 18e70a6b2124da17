//! End-to-end column runs against the in-memory stores

use super::test_utils::*;
use std::sync::Arc;
use termforge::cache::ResilientCache;
use termforge::content::ProcessingPhase;
use termforge::job::{JobStatus, PipelinePhase, ProcessingMode};
use termforge::store::{ContentUnitStore, InMemoryContentStore, InMemoryJobStore, JobStore};

#[tokio::test]
async fn full_pipeline_improves_low_scores_only() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&[
        "Alpha", "Beta", "Gamma",
    ])));
    let completion = Arc::new(
        KeyedCompletion::new()
            .score("Alpha", 9)
            .score("Beta", 5)
            .score("Gamma", 7),
    );
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        completion.clone(),
        ResilientCache::disabled(),
    );

    let outcome = orch.start(COLUMN, options(ProcessingMode::FullPipeline));
    assert!(outcome.success, "{}", outcome.message);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 3);
    assert_eq!(job.evaluated_count, 3);
    assert_eq!(job.low_quality_count, 1);
    assert_eq!(job.improved_count, 1);
    assert_eq!(job.finalized_count, 3);
    assert_eq!(job.ai_calls, 7);
    assert_eq!(completion.calls(), 7);
    assert!((job.average_quality_score - 7.0).abs() < 1e-9);
    assert_eq!(job.quality_distribution.excellent, 1);
    assert_eq!(job.quality_distribution.good, 1);
    assert_eq!(job.quality_distribution.needs_work, 1);
    assert!((job.actual_cost - 7.0 * CALL_COST).abs() < 1e-9);

    for term_id in ["t1", "t2", "t3"] {
        let unit = store.read_unit(term_id, COLUMN).unwrap().unwrap();
        assert_eq!(unit.processing_phase, ProcessingPhase::Final);
        assert!(!unit.needs_improvement);
    }
    let improved = store.read_unit("t2", COLUMN).unwrap().unwrap();
    assert!(improved.current_content().starts_with("Improved:"));
    assert_eq!(improved.evaluation_score, Some(5));
}

#[tokio::test]
async fn generate_only_leaves_units_generated() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha", "Beta"])));
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new()),
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateOnly)).success);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 2);
    assert_eq!(job.evaluated_count, 0);
    assert_eq!(job.finalized_count, 0);
    let unit = store.read_unit("t1", COLUMN).unwrap().unwrap();
    assert_eq!(unit.processing_phase, ProcessingPhase::Generated);
}

#[tokio::test]
async fn generate_evaluate_keeps_flagged_units_evaluated() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&["Alpha", "Beta"])));
    let completion = Arc::new(KeyedCompletion::new().score("Alpha", 9).score("Beta", 3));
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        completion,
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateEvaluate)).success);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.evaluated_count, 2);
    assert_eq!(job.low_quality_count, 1);
    assert_eq!(job.improved_count, 0);
    assert_eq!(job.finalized_count, 1);

    let passed = store.read_unit("t1", COLUMN).unwrap().unwrap();
    assert_eq!(passed.processing_phase, ProcessingPhase::Final);
    let flagged = store.read_unit("t2", COLUMN).unwrap().unwrap();
    assert_eq!(flagged.processing_phase, ProcessingPhase::Evaluated);
    assert!(flagged.needs_improvement);
}

#[tokio::test]
async fn one_failing_term_does_not_stop_the_job() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&[
        "Alpha", "Beta", "Gamma",
    ])));
    let completion = Arc::new(KeyedCompletion::new().failing("Beta"));
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        completion,
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::GenerateOnly)).success);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.generated_count, 2);
    assert_eq!(job.generation_errors, 1);
    assert_eq!(job.processed_terms, 3);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].term_id, "t2");
    assert_eq!(job.errors[0].phase, PipelinePhase::Generation);
    assert!(store.read_unit("t2", COLUMN).unwrap().is_none());
}

#[tokio::test]
async fn rejected_credentials_fail_the_job() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&[
        "Alpha", "Beta", "Gamma", "Delta",
    ])));
    let job_store = Arc::new(InMemoryJobStore::new());
    let completion = Arc::new(KeyedCompletion::new().rejecting_all());
    let orch = orchestrator(
        store.clone(),
        job_store.clone(),
        completion.clone(),
        ResilientCache::disabled(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.generation_errors, 2, "only the first batch ran");
    // Auth errors are not retried
    assert_eq!(completion.arrived(), 2);
    assert!(job_store.load_checkpoint(COLUMN).unwrap().is_none());
    assert_eq!(job_store.load_job(COLUMN).unwrap().unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn rerun_with_skip_existing_costs_nothing() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&[
        "Alpha", "Beta", "Gamma",
    ])));
    let completion = Arc::new(KeyedCompletion::new().score("Beta", 4));
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        completion.clone(),
        memory_cache(),
    );

    assert!(orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    let first = orch.wait(COLUMN).await.unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    let calls_after_first = completion.calls();

    let outcome = orch.start(COLUMN, options(ProcessingMode::FullPipeline));
    assert!(outcome.success, "{}", outcome.message);
    let second = orch.wait(COLUMN).await.unwrap();

    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.total_terms, 0);
    assert_eq!(second.ai_calls, 0);
    assert_eq!(second.actual_cost, 0.0);
    assert_eq!(completion.calls(), calls_after_first);
}

#[tokio::test]
async fn shared_cache_replays_a_column_for_free() {
    let cache = memory_cache();
    let names = ["Alpha", "Beta", "Gamma"];

    let first_store = Arc::new(InMemoryContentStore::with_terms(terms(&names)));
    let first_completion = Arc::new(KeyedCompletion::new().score("Gamma", 5));
    let first_orch = orchestrator(
        first_store.clone(),
        Arc::new(InMemoryJobStore::new()),
        first_completion.clone(),
        cache.clone(),
    );
    assert!(first_orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    let first = first_orch.wait(COLUMN).await.unwrap();
    assert_eq!(first.ai_calls, 7);

    // Fresh stores, same cache: every call is answered from the cache
    let second_store = Arc::new(InMemoryContentStore::with_terms(terms(&names)));
    let second_completion = Arc::new(KeyedCompletion::new().score("Gamma", 5));
    let second_orch = orchestrator(
        second_store.clone(),
        Arc::new(InMemoryJobStore::new()),
        second_completion.clone(),
        cache,
    );
    assert!(second_orch.start(COLUMN, options(ProcessingMode::FullPipeline)).success);
    let second = second_orch.wait(COLUMN).await.unwrap();

    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.ai_calls, 0);
    assert_eq!(second.cache_hits, 7);
    assert_eq!(second.actual_cost, 0.0);
    assert_eq!(second.finalized_count, 3);
    assert_eq!(second_completion.arrived(), 0);

    for term_id in ["t1", "t2", "t3"] {
        let a = first_store.read_unit(term_id, COLUMN).unwrap().unwrap();
        let b = second_store.read_unit(term_id, COLUMN).unwrap().unwrap();
        assert_eq!(a.current_content(), b.current_content());
    }
}

#[tokio::test]
async fn limit_and_reverse_select_from_the_end() {
    let store = Arc::new(InMemoryContentStore::with_terms(terms(&[
        "Alpha", "Beta", "Gamma", "Delta",
    ])));
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(KeyedCompletion::new()),
        ResilientCache::disabled(),
    );

    let mut opts = options(ProcessingMode::GenerateOnly);
    opts.reverse_order = true;
    opts.limit = Some(2);
    assert!(orch.start(COLUMN, opts).success);
    let job = orch.wait(COLUMN).await.unwrap();

    assert_eq!(job.total_terms, 2);
    assert!(store.read_unit("t4", COLUMN).unwrap().is_some());
    assert!(store.read_unit("t3", COLUMN).unwrap().is_some());
    assert!(store.read_unit("t1", COLUMN).unwrap().is_none());
}
