//! Processing options accepted by `start`.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which phases a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    GenerateOnly,
    GenerateEvaluate,
    FullPipeline,
}

impl ProcessingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMode::GenerateOnly => "generate-only",
            ProcessingMode::GenerateEvaluate => "generate-evaluate",
            ProcessingMode::FullPipeline => "full-pipeline",
        }
    }

    pub fn evaluates(self) -> bool {
        !matches!(self, ProcessingMode::GenerateOnly)
    }

    pub fn improves(self) -> bool {
        matches!(self, ProcessingMode::FullPipeline)
    }
}

impl FromStr for ProcessingMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "generate-only" => Ok(ProcessingMode::GenerateOnly),
            "generate-evaluate" => Ok(ProcessingMode::GenerateEvaluate),
            "full-pipeline" => Ok(ProcessingMode::FullPipeline),
            other => Err(PipelineError::Configuration(format!(
                "Invalid mode '{}' (expected generate-only, generate-evaluate or full-pipeline)",
                other
            ))),
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub mode: ProcessingMode,
    /// Units scoring below this are queued for improvement
    pub quality_threshold: u8,
    pub batch_size: usize,
    pub delay_between_batches_ms: u64,
    pub skip_existing: bool,
    /// Process terms in reverse order (bottom-up)
    #[serde(default)]
    pub reverse_order: bool,
    /// Cap on the number of terms in this run, applied after skip-existing filtering
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::FullPipeline,
            quality_threshold: 7,
            batch_size: 10,
            delay_between_batches_ms: 2000,
            skip_existing: true,
            reverse_order: false,
            limit: None,
        }
    }
}

impl StartOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(1..=10).contains(&self.quality_threshold) {
            return Err(PipelineError::Configuration(format!(
                "Quality threshold {} is outside [1, 10]",
                self.quality_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "Batch size must be at least 1".to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(PipelineError::Configuration(
                "Limit must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
