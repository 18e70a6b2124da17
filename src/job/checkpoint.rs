//! Remaining work of a job, persisted at every batch boundary.
//!
//! Each phase queue is append-at-the-back, drain-from-the-front. `drained` counts the
//! terms taken from the front of each queue since the checkpoint was created, so a
//! queued term has a stable sequence number `drained + index` that stores can use to
//! persist only what changed between boundaries.

use crate::content::Term;
use crate::job::options::StartOptions;
use crate::job::status::PipelinePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terms drained from the front of each phase queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOffsets {
    pub generation: u64,
    pub evaluation: u64,
    pub improvement: u64,
}

impl QueueOffsets {
    pub fn get(&self, phase: PipelinePhase) -> u64 {
        match phase {
            PipelinePhase::Generation => self.generation,
            PipelinePhase::Evaluation => self.evaluation,
            PipelinePhase::Improvement => self.improvement,
        }
    }

    fn get_mut(&mut self, phase: PipelinePhase) -> &mut u64 {
        match phase {
            PipelinePhase::Generation => &mut self.generation,
            PipelinePhase::Evaluation => &mut self.evaluation,
            PipelinePhase::Improvement => &mut self.improvement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub column_id: String,
    pub options: StartOptions,
    /// Phase whose queue is currently being drained
    pub phase: PipelinePhase,
    pub generation_pending: Vec<Term>,
    pub evaluation_pending: Vec<Term>,
    pub improvement_pending: Vec<Term>,
    #[serde(default)]
    pub drained: QueueOffsets,
    pub batches_completed: usize,
    /// Identifies the run this checkpoint belongs to
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobCheckpoint {
    pub fn new(column_id: impl Into<String>, options: StartOptions, terms: Vec<Term>) -> Self {
        let now = Utc::now();
        Self {
            column_id: column_id.into(),
            options,
            phase: PipelinePhase::Generation,
            generation_pending: terms,
            evaluation_pending: Vec::new(),
            improvement_pending: Vec::new(),
            drained: QueueOffsets::default(),
            batches_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn queue(&self, phase: PipelinePhase) -> &Vec<Term> {
        match phase {
            PipelinePhase::Generation => &self.generation_pending,
            PipelinePhase::Evaluation => &self.evaluation_pending,
            PipelinePhase::Improvement => &self.improvement_pending,
        }
    }

    pub fn queue_mut(&mut self, phase: PipelinePhase) -> &mut Vec<Term> {
        match phase {
            PipelinePhase::Generation => &mut self.generation_pending,
            PipelinePhase::Evaluation => &mut self.evaluation_pending,
            PipelinePhase::Improvement => &mut self.improvement_pending,
        }
    }

    /// Sequence numbers `[head, tail)` currently held by a phase queue.
    pub fn bounds(&self, phase: PipelinePhase) -> (u64, u64) {
        let head = self.drained.get(phase);
        (head, head + self.queue(phase).len() as u64)
    }

    /// Remove and return the next batch of the current phase.
    pub fn take_batch(&mut self, batch_size: usize) -> Vec<Term> {
        let phase = self.phase;
        let queue = self.queue_mut(phase);
        let n = batch_size.min(queue.len());
        let batch: Vec<Term> = queue.drain(..n).collect();
        *self.drained.get_mut(phase) += n as u64;
        batch
    }

    /// Units still queued in the current and later phases
    pub fn pending_units(&self) -> usize {
        self.generation_pending.len() + self.evaluation_pending.len() + self.improvement_pending.len()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
