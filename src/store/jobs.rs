//! Job record persistence
//!
//! Job snapshots and checkpoints are keyed by column id. A process that restarts
//! reloads them instead of losing in-flight jobs.
//!
//! In sled a checkpoint is a small header plus one entry per queued term, all in the
//! `checkpoints` tree under the column's key prefix. Saving a checkpoint of the same
//! run only removes the entries drained since the last save and inserts the ones
//! queued since, in one atomic batch.

use crate::content::Term;
use crate::error::StorageError;
use crate::job::status::{JobStatus, PipelinePhase};
use crate::job::{ColumnJob, JobCheckpoint, QueueOffsets, StartOptions};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashMap;

const TREE_JOBS: &str = "jobs";
const TREE_CHECKPOINTS: &str = "checkpoints";

const PHASES: [PipelinePhase; 3] = [
    PipelinePhase::Generation,
    PipelinePhase::Evaluation,
    PipelinePhase::Improvement,
];

pub trait JobStore: Send + Sync {
    fn save_job(&self, job: &ColumnJob) -> Result<(), StorageError>;
    fn load_job(&self, column_id: &str) -> Result<Option<ColumnJob>, StorageError>;
    fn list_jobs(&self) -> Result<Vec<ColumnJob>, StorageError>;
    fn save_checkpoint(&self, checkpoint: &JobCheckpoint) -> Result<(), StorageError>;
    fn load_checkpoint(&self, column_id: &str) -> Result<Option<JobCheckpoint>, StorageError>;
    fn delete_checkpoint(&self, column_id: &str) -> Result<(), StorageError>;

    /// Mark jobs left running by a dead process as paused; returns how many changed.
    fn mark_interrupted_jobs(&self) -> Result<usize, StorageError> {
        let mut changed = 0usize;
        for mut job in self.list_jobs()? {
            if job.status.is_running() {
                job.status = JobStatus::Paused;
                job.message = "interrupted; resume to continue".to_string();
                job.updated_at = chrono::Utc::now();
                self.save_job(&job)?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Checkpoint fields other than the queues, plus the sequence range each queue holds
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointHeader {
    column_id: String,
    options: StartOptions,
    phase: PipelinePhase,
    drained: QueueOffsets,
    /// Sequence number one past the last queued term, per phase
    tails: [u64; 3],
    batches_completed: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CheckpointHeader {
    fn of(checkpoint: &JobCheckpoint) -> Self {
        Self {
            column_id: checkpoint.column_id.clone(),
            options: checkpoint.options.clone(),
            phase: checkpoint.phase,
            drained: checkpoint.drained,
            tails: PHASES.map(|phase| checkpoint.bounds(phase).1),
            batches_completed: checkpoint.batches_completed,
            created_at: checkpoint.created_at,
            updated_at: checkpoint.updated_at,
        }
    }

    fn bounds(&self, index: usize) -> (u64, u64) {
        (self.drained.get(PHASES[index]), self.tails[index])
    }
}

fn phase_tag(phase: PipelinePhase) -> u8 {
    match phase {
        PipelinePhase::Generation => b'g',
        PipelinePhase::Evaluation => b'e',
        PipelinePhase::Improvement => b'i',
    }
}

fn column_prefix(column_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(column_id.len() + 1);
    key.extend_from_slice(column_id.as_bytes());
    key.push(0);
    key
}

fn header_key(column_id: &str) -> Vec<u8> {
    let mut key = column_prefix(column_id);
    key.push(b'h');
    key
}

fn queue_prefix(column_id: &str, phase: PipelinePhase) -> Vec<u8> {
    let mut key = column_prefix(column_id);
    key.push(b'q');
    key.push(phase_tag(phase));
    key
}

fn entry_key(column_id: &str, phase: PipelinePhase, seq: u64) -> Vec<u8> {
    let mut key = queue_prefix(column_id, phase);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

#[derive(Clone)]
pub struct SledJobStore {
    db: Db,
    jobs: Tree,
    checkpoints: Tree,
}

impl SledJobStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let jobs = db.open_tree(TREE_JOBS)?;
        let checkpoints = db.open_tree(TREE_CHECKPOINTS)?;
        Ok(Self {
            db,
            jobs,
            checkpoints,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn load_header(&self, column_id: &str) -> Result<Option<CheckpointHeader>, StorageError> {
        let Some(raw) = self.checkpoints.get(header_key(column_id))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Number of queued-term entries stored for a column
    pub fn checkpoint_entry_count(&self, column_id: &str) -> usize {
        PHASES
            .iter()
            .map(|phase| self.checkpoints.scan_prefix(queue_prefix(column_id, *phase)).count())
            .sum()
    }
}

impl JobStore for SledJobStore {
    fn save_job(&self, job: &ColumnJob) -> Result<(), StorageError> {
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(job.column_id.as_bytes(), value)?;
        Ok(())
    }

    fn load_job(&self, column_id: &str) -> Result<Option<ColumnJob>, StorageError> {
        let Some(raw) = self.jobs.get(column_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn list_jobs(&self) -> Result<Vec<ColumnJob>, StorageError> {
        let mut out = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn save_checkpoint(&self, checkpoint: &JobCheckpoint) -> Result<(), StorageError> {
        let column_id = checkpoint.column_id.as_str();
        let header = CheckpointHeader::of(checkpoint);
        let previous = self
            .load_header(column_id)?
            .filter(|prev| prev.created_at == checkpoint.created_at)
            .filter(|prev| {
                (0..PHASES.len()).all(|i| {
                    let (old_head, old_tail) = prev.bounds(i);
                    let (new_head, new_tail) = header.bounds(i);
                    old_head <= new_head && old_tail <= new_tail
                })
            });

        let mut batch = sled::Batch::default();
        if previous.is_none() {
            for item in self.checkpoints.scan_prefix(column_prefix(column_id)).keys() {
                batch.remove(item?);
            }
        }
        for (i, phase) in PHASES.iter().enumerate() {
            let (new_head, new_tail) = header.bounds(i);
            let (old_head, old_tail) = previous
                .as_ref()
                .map(|prev| prev.bounds(i))
                .unwrap_or((new_head, new_head));
            for seq in old_head..new_head.min(old_tail) {
                batch.remove(entry_key(column_id, *phase, seq));
            }
            let queue = checkpoint.queue(*phase);
            for seq in old_tail.max(new_head)..new_tail {
                let term = &queue[(seq - new_head) as usize];
                batch.insert(entry_key(column_id, *phase, seq), serde_json::to_vec(term)?);
            }
        }
        batch.insert(header_key(column_id), serde_json::to_vec(&header)?);
        self.checkpoints.apply_batch(batch)?;
        Ok(())
    }

    fn load_checkpoint(&self, column_id: &str) -> Result<Option<JobCheckpoint>, StorageError> {
        let Some(header) = self.load_header(column_id)? else {
            return Ok(None);
        };
        let mut queues: [Vec<Term>; 3] = Default::default();
        for (i, phase) in PHASES.iter().enumerate() {
            for item in self.checkpoints.scan_prefix(queue_prefix(column_id, *phase)) {
                let (_, value) = item?;
                queues[i].push(serde_json::from_slice(&value)?);
            }
            let (head, tail) = header.bounds(i);
            if queues[i].len() as u64 != tail - head {
                return Err(StorageError::Serialization(format!(
                    "checkpoint for '{}' holds {} {} entries, expected {}",
                    column_id,
                    queues[i].len(),
                    phase,
                    tail - head
                )));
            }
        }
        let [generation_pending, evaluation_pending, improvement_pending] = queues;
        Ok(Some(JobCheckpoint {
            column_id: header.column_id,
            options: header.options,
            phase: header.phase,
            generation_pending,
            evaluation_pending,
            improvement_pending,
            drained: header.drained,
            batches_completed: header.batches_completed,
            created_at: header.created_at,
            updated_at: header.updated_at,
        }))
    }

    fn delete_checkpoint(&self, column_id: &str) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for key in self.checkpoints.scan_prefix(column_prefix(column_id)).keys() {
            batch.remove(key?);
        }
        self.checkpoints.apply_batch(batch)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ColumnJob>>,
    checkpoints: RwLock<HashMap<String, JobCheckpoint>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn save_job(&self, job: &ColumnJob) -> Result<(), StorageError> {
        self.jobs.write().insert(job.column_id.clone(), job.clone());
        Ok(())
    }

    fn load_job(&self, column_id: &str) -> Result<Option<ColumnJob>, StorageError> {
        Ok(self.jobs.read().get(column_id).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<ColumnJob>, StorageError> {
        let mut jobs: Vec<ColumnJob> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.column_id.cmp(&b.column_id));
        Ok(jobs)
    }

    fn save_checkpoint(&self, checkpoint: &JobCheckpoint) -> Result<(), StorageError> {
        self.checkpoints
            .write()
            .insert(checkpoint.column_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self, column_id: &str) -> Result<Option<JobCheckpoint>, StorageError> {
        Ok(self.checkpoints.read().get(column_id).cloned())
    }

    fn delete_checkpoint(&self, column_id: &str) -> Result<(), StorageError> {
        self.checkpoints.write().remove(column_id);
        Ok(())
    }
}
