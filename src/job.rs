//! Column jobs
//!
//! One job is one orchestration run over one column across a term subset. The record
//! is bookkeeping only: counters, quality distribution, cost and per-term errors. The
//! checkpoint holds the work still to do, split by phase.

pub mod checkpoint;
pub mod options;
pub mod status;
pub mod tracker;

pub use checkpoint::{JobCheckpoint, QueueOffsets};
pub use options::{ProcessingMode, StartOptions};
pub use status::{
    ColumnJob, FeedbackSample, JobErrorRecord, JobStatus, PipelinePhase, QualityDistribution,
};
pub use tracker::JobTracker;
