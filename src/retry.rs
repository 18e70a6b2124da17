//! Retry policy
//!
//! One policy applied uniformly by all three phase executors: bounded attempts,
//! capped exponential backoff, a per-call deadline, and an optional fallback model
//! tier for the final attempt. Only errors classified retryable are attempted again.

use crate::error::PipelineError;
use crate::model::ModelTier;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Serializable retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Tier to use on the last attempt, if any
    #[serde(default)]
    pub fallback_tier: Option<ModelTier>,
    /// Generated or improved text shorter than this is retried
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_min_content_chars() -> usize {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            call_timeout_ms: default_call_timeout_ms(),
            fallback_tier: None,
            min_content_chars: default_min_content_chars(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.call_timeout_ms == 0 {
            return Err("call_timeout_ms must be greater than zero".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    call_timeout: Duration,
    fallback_tier: Option<ModelTier>,
    min_content_chars: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
            call_timeout: Duration::from_millis(config.call_timeout_ms.max(1)),
            fallback_tier: config.fallback_tier,
            min_content_chars: config.min_content_chars,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn min_content_chars(&self) -> usize {
        self.min_content_chars
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Tier for a given attempt: the fallback only ever replaces the last attempt.
    pub fn tier_for_attempt(&self, attempt: u32, primary: ModelTier) -> ModelTier {
        match self.fallback_tier {
            Some(fallback) if self.max_attempts > 1 && attempt == self.max_attempts => fallback,
            _ => primary,
        }
    }

    /// Bound one provider call by the per-call deadline.
    ///
    /// Only the call itself is timed; callers wrap it after acquiring any shared
    /// concurrency permit.
    pub async fn timed<T, Fut>(&self, call: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// A timeout reported by [`RetryPolicy::timed`] inside `op` is retried like any
    /// other transient failure.
    pub async fn run<T, F, Fut>(&self, primary: ModelTier, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut(u32, ModelTier) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 1u32;
        loop {
            let tier = self.tier_for_attempt(attempt, primary);
            match op(attempt, tier).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
