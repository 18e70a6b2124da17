//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::PipelineError;

/// Map pipeline errors to a string for CLI output.
pub fn map_error(e: &PipelineError) -> String {
    match e {
        PipelineError::Configuration(message) => format!("Configuration error: {}", message),
        PipelineError::Auth(message) => format!(
            "Provider authentication failed: {}\nCheck provider.api_key or the configured API key variable.",
            message
        ),
        other => other.to_string(),
    }
}
