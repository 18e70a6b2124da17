//! Sled-backed stores: durability, forward-only writes and job rehydration

use super::test_utils::*;
use std::sync::Arc;
use tempfile::TempDir;
use termforge::cache::{CacheEntry, CacheKey, ResilientCache, ResponseCache, SledResponseCache};
use termforge::content::{ContentUnit, ProcessingPhase};
use termforge::job::{
    ColumnJob, JobCheckpoint, JobStatus, PipelinePhase, ProcessingMode,
};
use termforge::model::ModelTier;
use termforge::store::{
    ContentUnitStore, JobStore, SledContentStore, SledJobStore, TermFilter, TermRepository,
};

#[test]
fn units_survive_reopen_and_never_move_backwards() {
    let dir = TempDir::new().unwrap();
    {
        let store = SledContentStore::open(dir.path()).unwrap();
        let mut unit = ContentUnit::generated(
            "t1",
            COLUMN,
            "Generated body text".to_string(),
            1,
            ModelTier::Standard,
            0.02,
        );
        unit.record_evaluation(9, "Clear.".to_string(), 7, 0.01).unwrap();
        unit.finalize().unwrap();
        store.write_unit(&unit).unwrap();
        store.flush().unwrap();
    }

    let store = SledContentStore::open(dir.path()).unwrap();
    let unit = store.read_unit("t1", COLUMN).unwrap().unwrap();
    assert_eq!(unit.processing_phase, ProcessingPhase::Final);
    assert!((unit.total_cost - 0.03).abs() < 1e-9);
    assert!(store.has_existing_content("t1", COLUMN).unwrap());

    let regression = ContentUnit::generated(
        "t1",
        COLUMN,
        "Older text".to_string(),
        1,
        ModelTier::Standard,
        0.02,
    );
    assert!(store.write_unit(&regression).is_err());

    // Nor can a newer prompt version move it back
    let next_version = ContentUnit::generated(
        "t1",
        COLUMN,
        "Fresh text".to_string(),
        2,
        ModelTier::Standard,
        0.02,
    );
    assert!(store.write_unit(&next_version).is_err());
    let kept = store.read_unit("t1", COLUMN).unwrap().unwrap();
    assert_eq!(kept.processing_phase, ProcessingPhase::Final);
    assert_eq!(kept.generated_content, "Generated body text");
    assert_eq!(store.list_units(COLUMN).unwrap().len(), 1);
}

#[test]
fn imported_terms_are_listed_in_id_order() {
    let dir = TempDir::new().unwrap();
    let store = SledContentStore::open(dir.path()).unwrap();
    let mut corpus = terms(&["Alpha", "Beta", "Gamma"]);
    corpus.reverse();
    assert_eq!(store.import_terms(&corpus).unwrap(), 3);

    let listed = store.list_terms(&TermFilter::all()).unwrap();
    let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["t1", "t2", "t3"]);

    let reversed = store
        .list_terms(&TermFilter {
            reverse: true,
            ..TermFilter::default()
        })
        .unwrap();
    assert_eq!(reversed[0].id, "t3");
}

#[test]
fn sled_cache_persists_entries() {
    let dir = TempDir::new().unwrap();
    let key = CacheKey::compute("t1", COLUMN, 1, ModelTier::Standard, "prompt");
    {
        let db = sled::open(dir.path()).unwrap();
        let cache = SledResponseCache::new(&db).unwrap();
        cache
            .put(&key, &CacheEntry::new("cached text", 0.5, ModelTier::Standard))
            .unwrap();
        db.flush().unwrap();
    }

    let db = sled::open(dir.path()).unwrap();
    let cache = ResilientCache::new(Arc::new(SledResponseCache::new(&db).unwrap()));
    let entry = cache.get(&key).unwrap();
    assert_eq!(entry.text, "cached text");
    assert_eq!(entry.model_tier, ModelTier::Standard);
}

#[tokio::test]
async fn interrupted_job_is_rehydrated_as_paused_and_resumes() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let store = Arc::new(SledContentStore::new(db.clone()).unwrap());
    let job_store = Arc::new(SledJobStore::new(db.clone()).unwrap());
    let corpus = terms(&["Alpha", "Beta", "Gamma"]);
    store.import_terms(&corpus).unwrap();

    // State a crashed process would leave behind: running job, one term generated
    let opts = options(ProcessingMode::GenerateOnly);
    let mut job = ColumnJob::new(COLUMN, opts.mode, opts.quality_threshold, 3, 0.0);
    job.status = JobStatus::Generating;
    job.current_phase = Some(PipelinePhase::Generation);
    job.processed_terms = 1;
    job.generated_count = 1;
    job_store.save_job(&job).unwrap();
    let mut checkpoint = JobCheckpoint::new(COLUMN, opts, corpus.clone());
    checkpoint.take_batch(1);
    checkpoint.batches_completed = 1;
    job_store.save_checkpoint(&checkpoint).unwrap();

    let completion = Arc::new(KeyedCompletion::new());
    let orch = orchestrator(
        store.clone(),
        job_store.clone(),
        completion.clone(),
        ResilientCache::disabled(),
    );
    assert_eq!(orch.rehydrate().unwrap(), 1);

    let rehydrated = orch.status(COLUMN).unwrap();
    assert_eq!(rehydrated.status, JobStatus::Paused);
    assert_eq!(
        job_store.load_job(COLUMN).unwrap().unwrap().status,
        JobStatus::Paused
    );

    let resume = orch.resume(COLUMN);
    assert!(resume.success, "{}", resume.message);
    let finished = orch.wait(COLUMN).await.unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.generated_count, 3);
    assert_eq!(finished.processed_terms, 3);
    assert_eq!(completion.calls(), 2);
    assert!(store.read_unit("t1", COLUMN).unwrap().is_none());
    assert!(store.read_unit("t3", COLUMN).unwrap().is_some());
    assert!(job_store.load_checkpoint(COLUMN).unwrap().is_none());
}

#[test]
fn completed_jobs_rehydrate_unchanged() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let job_store = SledJobStore::new(db).unwrap();

    let mut job = ColumnJob::new(COLUMN, ProcessingMode::FullPipeline, 7, 2, 0.1);
    job.status = JobStatus::Completed;
    job_store.save_job(&job).unwrap();

    assert_eq!(job_store.mark_interrupted_jobs().unwrap(), 0);
    let loaded = job_store.load_job(COLUMN).unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    assert_eq!(job_store.list_jobs().unwrap().len(), 1);
}
