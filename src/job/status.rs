//! Job status record exposed to callers.

use crate::job::options::ProcessingMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Generating,
    Evaluating,
    Improving,
    Completed,
    Failed,
    Paused,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Generating => "generating",
            JobStatus::Evaluating => "evaluating",
            JobStatus::Improving => "improving",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
        }
    }

    /// Active jobs block a second job on the same column. Paused counts as active.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            JobStatus::Idle | JobStatus::Completed | JobStatus::Failed
        )
    }

    /// A phase is currently executing
    pub fn is_running(self) -> bool {
        matches!(
            self,
            JobStatus::Generating | JobStatus::Evaluating | JobStatus::Improving
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three AI interaction phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Generation,
    Evaluation,
    Improvement,
}

impl PipelinePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelinePhase::Generation => "generation",
            PipelinePhase::Evaluation => "evaluation",
            PipelinePhase::Improvement => "improvement",
        }
    }

    pub fn running_status(self) -> JobStatus {
        match self {
            PipelinePhase::Generation => JobStatus::Generating,
            PipelinePhase::Evaluation => JobStatus::Evaluating,
            PipelinePhase::Improvement => JobStatus::Improving,
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score buckets: excellent 9-10, good 7-8, needs work 5-6, poor 1-4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityDistribution {
    pub excellent: usize,
    pub good: usize,
    pub needs_work: usize,
    pub poor: usize,
}

impl QualityDistribution {
    pub fn record(&mut self, score: u8) {
        match score {
            9..=10 => self.excellent += 1,
            7..=8 => self.good += 1,
            5..=6 => self.needs_work += 1,
            _ => self.poor += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.excellent + self.good + self.needs_work + self.poor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorRecord {
    pub term_id: String,
    pub phase: PipelinePhase,
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSample {
    pub term_id: String,
    pub score: u8,
    pub feedback: String,
}

/// Snapshot of one column job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnJob {
    pub column_id: String,
    pub mode: ProcessingMode,
    pub quality_threshold: u8,
    pub status: JobStatus,
    pub current_phase: Option<PipelinePhase>,
    pub total_terms: usize,
    pub processed_terms: usize,
    pub generated_count: usize,
    pub generation_errors: usize,
    pub evaluated_count: usize,
    pub evaluation_errors: usize,
    pub average_quality_score: f64,
    pub low_quality_count: usize,
    pub improved_count: usize,
    pub improvement_errors: usize,
    pub finalized_count: usize,
    pub cache_hits: usize,
    pub ai_calls: usize,
    pub quality_distribution: QualityDistribution,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub errors: Vec<JobErrorRecord>,
    pub feedback_samples: Vec<FeedbackSample>,
    pub estimated_seconds_remaining: Option<f64>,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ColumnJob {
    pub fn new(
        column_id: impl Into<String>,
        mode: ProcessingMode,
        quality_threshold: u8,
        total_terms: usize,
        estimated_cost: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            column_id: column_id.into(),
            mode,
            quality_threshold,
            status: JobStatus::Idle,
            current_phase: None,
            total_terms,
            processed_terms: 0,
            generated_count: 0,
            generation_errors: 0,
            evaluated_count: 0,
            evaluation_errors: 0,
            average_quality_score: 0.0,
            low_quality_count: 0,
            improved_count: 0,
            improvement_errors: 0,
            finalized_count: 0,
            cache_hits: 0,
            ai_calls: 0,
            quality_distribution: QualityDistribution::default(),
            estimated_cost,
            actual_cost: 0.0,
            errors: Vec::new(),
            feedback_samples: Vec::new(),
            estimated_seconds_remaining: None,
            message: String::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
