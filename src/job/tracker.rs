//! Job status and cost tracker
//!
//! Called after every unit-level operation, possibly from many concurrent tasks. Every
//! update is O(1) under one short lock; counters are increments, never overwrites, so
//! completion order inside a batch does not matter.

use crate::error::PipelineError;
use crate::job::status::{
    ColumnJob, FeedbackSample, JobErrorRecord, JobStatus, PipelinePhase,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::time::Duration;

struct TrackerState {
    job: ColumnJob,
    timed_secs: f64,
    timed_units: usize,
    pending_units: usize,
}

pub struct JobTracker {
    state: Mutex<TrackerState>,
    sample_limit: usize,
    error_limit: usize,
}

const DEFAULT_ERROR_LIMIT: usize = 100;

impl JobTracker {
    pub fn new(job: ColumnJob, sample_limit: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                job,
                timed_secs: 0.0,
                timed_units: 0,
                pending_units: 0,
            }),
            sample_limit,
            error_limit: DEFAULT_ERROR_LIMIT,
        }
    }

    /// Keep at most `limit` error records; the per-phase error counters are unaffected.
    pub fn with_error_limit(mut self, limit: usize) -> Self {
        self.error_limit = limit;
        self
    }

    /// Read-only copy of the job, with the derived time-remaining estimate filled in.
    pub fn snapshot(&self) -> ColumnJob {
        let state = self.state.lock();
        let mut job = state.job.clone();
        job.estimated_seconds_remaining = if state.timed_units == 0 || !job.status.is_running() {
            None
        } else {
            Some(state.timed_secs / state.timed_units as f64 * state.pending_units as f64)
        };
        job
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().job.status
    }

    pub fn set_status(
        &self,
        status: JobStatus,
        phase: Option<PipelinePhase>,
        message: impl Into<String>,
    ) {
        let mut state = self.state.lock();
        let job = &mut state.job;
        job.status = status;
        job.current_phase = phase;
        job.message = message.into();
        job.updated_at = Utc::now();
        if status.is_terminal() {
            job.completed_at = Some(job.updated_at);
        } else {
            job.completed_at = None;
        }
    }

    /// Units still queued across all phases; feeds the time-remaining estimate.
    pub fn set_pending_units(&self, pending: usize) {
        self.state.lock().pending_units = pending;
    }

    /// Wall-clock time spent on a batch of `units` units.
    pub fn record_batch_timing(&self, elapsed: Duration, units: usize) {
        let mut state = self.state.lock();
        state.timed_secs += elapsed.as_secs_f64();
        state.timed_units += units;
    }

    /// Record one billed provider call. Negative costs are ignored so that
    /// `actual_cost` never decreases.
    pub fn record_ai_call(&self, cost: f64) {
        let mut state = self.state.lock();
        state.job.ai_calls += 1;
        if cost.is_finite() && cost > 0.0 {
            state.job.actual_cost += cost;
        }
    }

    pub fn record_cache_hit(&self) {
        self.state.lock().job.cache_hits += 1;
    }

    pub fn record_generated(&self) {
        let mut state = self.state.lock();
        state.job.processed_terms += 1;
        state.job.generated_count += 1;
        state.job.updated_at = Utc::now();
    }

    pub fn record_generation_error(&self, term_id: &str, error: &PipelineError) {
        let mut state = self.state.lock();
        state.job.processed_terms += 1;
        state.job.generation_errors += 1;
        push_error(&mut state.job, self.error_limit, term_id, PipelinePhase::Generation, error);
    }

    /// Record a parsed evaluation score. The running mean is updated incrementally.
    pub fn record_evaluated(&self, term_id: &str, score: u8, feedback: &str) {
        let mut state = self.state.lock();
        let job = &mut state.job;
        job.evaluated_count += 1;
        let n = job.evaluated_count as f64;
        job.average_quality_score += (f64::from(score) - job.average_quality_score) / n;
        job.quality_distribution.record(score);
        if score < job.quality_threshold {
            job.low_quality_count += 1;
        }
        if job.feedback_samples.len() < self.sample_limit {
            job.feedback_samples.push(FeedbackSample {
                term_id: term_id.to_string(),
                score,
                feedback: feedback.to_string(),
            });
        }
        job.updated_at = Utc::now();
    }

    pub fn record_evaluation_error(&self, term_id: &str, error: &PipelineError) {
        let mut state = self.state.lock();
        state.job.evaluation_errors += 1;
        push_error(&mut state.job, self.error_limit, term_id, PipelinePhase::Evaluation, error);
    }

    pub fn record_improved(&self) {
        let mut state = self.state.lock();
        state.job.improved_count += 1;
        state.job.updated_at = Utc::now();
    }

    pub fn record_improvement_error(&self, term_id: &str, error: &PipelineError) {
        let mut state = self.state.lock();
        state.job.improvement_errors += 1;
        push_error(&mut state.job, self.error_limit, term_id, PipelinePhase::Improvement, error);
    }

    pub fn record_finalized(&self) {
        self.state.lock().job.finalized_count += 1;
    }
}

fn push_error(
    job: &mut ColumnJob,
    limit: usize,
    term_id: &str,
    phase: PipelinePhase,
    error: &PipelineError,
) {
    let now = Utc::now();
    job.updated_at = now;
    if job.errors.len() >= limit {
        return;
    }
    job.errors.push(JobErrorRecord {
        term_id: term_id.to_string(),
        phase,
        kind: error.kind().to_string(),
        message: error.to_string(),
        timestamp: now,
    });
}
