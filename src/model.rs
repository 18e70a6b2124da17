//! Model selection strategy
//!
//! Maps a column's complexity tier to a model tier and produces pre-run cost
//! estimates. Pure computation; no provider calls.

use crate::column::{ColumnDefinition, ComplexityTier};
use crate::error::PipelineError;
use crate::job::ProcessingMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete model tier handed to the completion service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Economy => "economy",
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-1K-token rates for each model tier (currency units are up to the deployment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_economy_rate")]
    pub economy_per_1k: f64,
    #[serde(default = "default_standard_rate")]
    pub standard_per_1k: f64,
    #[serde(default = "default_premium_rate")]
    pub premium_per_1k: f64,
}

fn default_economy_rate() -> f64 {
    0.0004
}

fn default_standard_rate() -> f64 {
    0.0016
}

fn default_premium_rate() -> f64 {
    0.008
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            economy_per_1k: default_economy_rate(),
            standard_per_1k: default_standard_rate(),
            premium_per_1k: default_premium_rate(),
        }
    }
}

impl PricingConfig {
    pub fn rate_per_1k(&self, tier: ModelTier) -> f64 {
        match tier {
            ModelTier::Economy => self.economy_per_1k,
            ModelTier::Standard => self.standard_per_1k,
            ModelTier::Premium => self.premium_per_1k,
        }
    }

    /// Cost of `tokens` tokens billed at `tier`
    pub fn cost_for_tokens(&self, tier: ModelTier, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.rate_per_1k(tier)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, rate) in [
            ("economy_per_1k", self.economy_per_1k),
            ("standard_per_1k", self.standard_per_1k),
            ("premium_per_1k", self.premium_per_1k),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(format!("{} must be a non-negative number", name));
            }
        }
        Ok(())
    }
}

/// Up-front cost estimate shown to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub estimated_cost: f64,
    pub term_count: usize,
    pub model_tier: ModelTier,
}

/// Chooses model tiers and estimates job cost
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pricing: PricingConfig,
}

impl ModelSelector {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn select_model(&self, complexity: ComplexityTier) -> ModelTier {
        match complexity {
            ComplexityTier::Simple => ModelTier::Economy,
            ComplexityTier::Moderate => ModelTier::Standard,
            ComplexityTier::Complex => ModelTier::Premium,
        }
    }

    /// Select by tier name; unknown names fail with a configuration error.
    pub fn select_model_named(&self, complexity: &str) -> Result<ModelTier, PipelineError> {
        Ok(self.select_model(complexity.parse()?))
    }

    /// Phase multiplier: only low-quality units reach improvement, so the full
    /// pipeline costs well under three generation passes.
    pub fn phase_multiplier(mode: ProcessingMode) -> f64 {
        match mode {
            ProcessingMode::GenerateOnly => 1.0,
            ProcessingMode::GenerateEvaluate => 1.3,
            ProcessingMode::FullPipeline => 1.6,
        }
    }

    pub fn estimate_cost(
        &self,
        term_count: usize,
        column: &ColumnDefinition,
        mode: ProcessingMode,
    ) -> CostEstimate {
        let model_tier = self.select_model(column.complexity);
        let tokens = term_count as u64 * u64::from(column.estimated_tokens);
        let estimated_cost =
            self.pricing.cost_for_tokens(model_tier, tokens) * Self::phase_multiplier(mode);
        CostEstimate {
            estimated_cost,
            term_count,
            model_tier,
        }
    }
}
