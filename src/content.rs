//! Terms and content units
//!
//! A content unit is the generated, evaluated and improved content for one
//! (term, column) pair. Its processing phase only ever moves forward.

use crate::error::PipelineError;
use crate::model::ModelTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A corpus entry. Owned by the term repository; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    pub name: String,
}

impl Term {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Per-unit processing state; declaration order is the only legal direction of travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPhase {
    Generated,
    Evaluated,
    /// Rewritten but not yet finalized. Improvement writes `Final` directly, so
    /// this state only appears in units written by other tools.
    Improved,
    Final,
}

impl ProcessingPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingPhase::Generated => "generated",
            ProcessingPhase::Evaluated => "evaluated",
            ProcessingPhase::Improved => "improved",
            ProcessingPhase::Final => "final",
        }
    }
}

impl fmt::Display for ProcessingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable unit of work keyed by (term_id, column_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub term_id: String,
    pub column_id: String,
    pub generated_content: String,
    pub evaluation_score: Option<u8>,
    pub evaluation_feedback: Option<String>,
    pub improved_content: Option<String>,
    pub needs_improvement: bool,
    pub processing_phase: ProcessingPhase,
    pub prompt_version: u32,
    pub model_tier: ModelTier,
    pub generation_cost: f64,
    /// Cost of every billed call made for this unit, across phases
    pub total_cost: f64,
    pub updated_at: DateTime<Utc>,
}

impl ContentUnit {
    pub fn generated(
        term_id: impl Into<String>,
        column_id: impl Into<String>,
        content: String,
        prompt_version: u32,
        model_tier: ModelTier,
        cost: f64,
    ) -> Self {
        Self {
            term_id: term_id.into(),
            column_id: column_id.into(),
            generated_content: content,
            evaluation_score: None,
            evaluation_feedback: None,
            improved_content: None,
            needs_improvement: false,
            processing_phase: ProcessingPhase::Generated,
            prompt_version,
            model_tier,
            generation_cost: cost,
            total_cost: cost,
            updated_at: Utc::now(),
        }
    }

    /// Content a reader should see: the improved text when present
    pub fn current_content(&self) -> &str {
        self.improved_content
            .as_deref()
            .unwrap_or(&self.generated_content)
    }

    /// Attach an evaluation score and feedback, moving the unit to `evaluated`.
    pub fn record_evaluation(
        &mut self,
        score: u8,
        feedback: String,
        quality_threshold: u8,
        cost: f64,
    ) -> Result<(), PipelineError> {
        self.advance(ProcessingPhase::Evaluated)?;
        self.evaluation_score = Some(score);
        self.evaluation_feedback = Some(feedback);
        self.needs_improvement = score < quality_threshold;
        self.total_cost += cost;
        Ok(())
    }

    /// Attach improved content, moving the unit to `final`.
    pub fn record_improvement(&mut self, content: String, cost: f64) -> Result<(), PipelineError> {
        if self.evaluation_score.is_none() {
            return Err(PipelineError::InvalidTransition(format!(
                "unit ({}, {}) cannot be improved before it is evaluated",
                self.term_id, self.column_id
            )));
        }
        self.advance(ProcessingPhase::Final)?;
        self.improved_content = Some(content);
        self.needs_improvement = false;
        self.total_cost += cost;
        Ok(())
    }

    /// Mark an evaluated unit as final without improvement.
    pub fn finalize(&mut self) -> Result<(), PipelineError> {
        if self.evaluation_score.is_none() {
            return Err(PipelineError::InvalidTransition(format!(
                "unit ({}, {}) cannot be finalized before it is evaluated",
                self.term_id, self.column_id
            )));
        }
        self.advance(ProcessingPhase::Final)
    }

    fn advance(&mut self, next: ProcessingPhase) -> Result<(), PipelineError> {
        if next <= self.processing_phase {
            return Err(PipelineError::InvalidTransition(format!(
                "unit ({}, {}) cannot move from {} to {}",
                self.term_id, self.column_id, self.processing_phase, next
            )));
        }
        self.processing_phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
