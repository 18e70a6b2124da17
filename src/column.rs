//! Column definitions
//!
//! A column is one named content section (e.g. "key concepts") generated independently
//! across the whole term corpus. Definitions are immutable configuration, loaded once
//! per job.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Editorial importance of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCategory {
    Essential,
    Important,
    Supplementary,
    Advanced,
}

/// Declared complexity of a column; drives model tier selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
}

impl ComplexityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Complex => "complex",
        }
    }
}

impl FromStr for ComplexityTier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ComplexityTier::Simple),
            "moderate" => Ok(ComplexityTier::Moderate),
            "complex" => Ok(ComplexityTier::Complex),
            other => Err(PipelineError::Configuration(format!(
                "Unknown complexity tier '{}' (expected simple, moderate or complex)",
                other
            ))),
        }
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three prompt templates of a column.
///
/// Templates use `{term}`, `{column}`, `{content}` and `{feedback}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTriplet {
    pub generative: String,
    pub evaluative: String,
    pub improvement: String,
}

/// A named content section to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub id: String,
    pub display_name: String,
    pub category: ColumnCategory,
    pub complexity: ComplexityTier,
    pub prompts: PromptTriplet,
    /// Expected output size of one generated unit, in tokens
    pub estimated_tokens: u32,
    /// Bumping the version makes every cached response for this column unreachable
    #[serde(default = "default_prompt_version")]
    pub prompt_version: u32,
}

fn default_prompt_version() -> u32 {
    1
}

impl ColumnDefinition {
    pub fn render_generative(&self, term_name: &str) -> String {
        render(&self.prompts.generative, term_name, &self.display_name, "", "")
    }

    pub fn render_evaluative(&self, term_name: &str, content: &str) -> String {
        render(
            &self.prompts.evaluative,
            term_name,
            &self.display_name,
            content,
            "",
        )
    }

    pub fn render_improvement(&self, term_name: &str, content: &str, feedback: &str) -> String {
        render(
            &self.prompts.improvement,
            term_name,
            &self.display_name,
            content,
            feedback,
        )
    }

    /// Validate a single definition
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Column id cannot be empty".to_string());
        }
        if self.prompts.generative.trim().is_empty()
            || self.prompts.evaluative.trim().is_empty()
            || self.prompts.improvement.trim().is_empty()
        {
            return Err("All three prompt templates must be non-empty".to_string());
        }
        if !self.prompts.generative.contains("{term}") {
            return Err("Generative prompt must reference {term}".to_string());
        }
        if !self.prompts.evaluative.contains("{content}") {
            return Err("Evaluative prompt must reference {content}".to_string());
        }
        if self.estimated_tokens == 0 {
            return Err("estimated_tokens must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Substitute placeholders in one left-to-right pass; inserted values are never rescanned.
fn render(template: &str, term: &str, column: &str, content: &str, feedback: &str) -> String {
    let mut out = String::with_capacity(template.len() + content.len() + feedback.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = [
            ("{term}", term),
            ("{column}", column),
            ("{content}", content),
            ("{feedback}", feedback),
        ]
        .into_iter()
        .find(|(placeholder, _)| tail.starts_with(placeholder));
        match value {
            Some((placeholder, value)) => {
                out.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lookup of column definitions by id
#[derive(Debug, Clone, Default)]
pub struct ColumnRegistry {
    columns: HashMap<String, ColumnDefinition>,
}

impl ColumnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ColumnDefinition>,
    ) -> Result<Self, PipelineError> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: ColumnDefinition) -> Result<(), PipelineError> {
        definition.validate().map_err(|e| {
            PipelineError::Configuration(format!("Column '{}': {}", definition.id, e))
        })?;
        if self.columns.contains_key(&definition.id) {
            return Err(PipelineError::Configuration(format!(
                "Duplicate column id '{}'",
                definition.id
            )));
        }
        self.columns.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn get(&self, column_id: &str) -> Result<&ColumnDefinition, PipelineError> {
        self.columns
            .get(column_id)
            .ok_or_else(|| PipelineError::Configuration(format!("Unknown column id '{}'", column_id)))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.columns.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn sample_column(id: &str) -> ColumnDefinition {
    ColumnDefinition {
        id: id.to_string(),
        display_name: "Key Concepts".to_string(),
        category: ColumnCategory::Essential,
        complexity: ComplexityTier::Moderate,
        prompts: PromptTriplet {
            generative: "Write the {column} section for {term}.".to_string(),
            evaluative: "Score this {column} text for {term} from 1-10: {content}".to_string(),
            improvement: "Improve this text for {term}: {content}\nFeedback: {feedback}"
                .to_string(),
        },
        estimated_tokens: 400,
        prompt_version: 1,
    }
}
