//! Presentation: text and table formatting for job snapshots, estimates and quality.

use crate::error::{PipelineError, StorageError};
use crate::job::ColumnJob;
use crate::model::CostEstimate;
use crate::orchestrator::QualitySummary;
use comfy_table::{presets, Table};

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::Storage(StorageError::Serialization(e.to_string())))
}

pub fn format_status_table(jobs: &[ColumnJob], format: &str) -> Result<String, PipelineError> {
    if format == "json" {
        return to_json(&jobs);
    }
    if jobs.is_empty() {
        return Ok("No column jobs recorded.".to_string());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.set_header(vec![
        "Column", "Status", "Phase", "Mode", "Processed", "Generated", "Evaluated", "Improved",
        "Errors", "Avg Score", "Cost", "ETA",
    ]);
    for job in jobs {
        let phase = job
            .current_phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let errors = job.generation_errors + job.evaluation_errors + job.improvement_errors;
        let eta = job
            .estimated_seconds_remaining
            .map(|secs| format!("{:.0}s", secs))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            job.column_id.clone(),
            job.status.to_string(),
            phase,
            job.mode.to_string(),
            format!("{}/{}", job.processed_terms, job.total_terms),
            job.generated_count.to_string(),
            job.evaluated_count.to_string(),
            job.improved_count.to_string(),
            errors.to_string(),
            format!("{:.2}", job.average_quality_score),
            format!("{:.4}/{:.4}", job.actual_cost, job.estimated_cost),
            eta,
        ]);
    }
    Ok(table.to_string())
}

/// Final report printed after `run` or `resume` returns.
pub fn format_job_summary(job: &ColumnJob) -> String {
    let mut s = format!(
        "Column '{}' {}: {}\n  Terms: {} processed of {}\n  Generated: {} ({} errors)\n  Evaluated: {} ({} errors, {} below threshold)\n  Improved: {} ({} errors)\n  Finalized: {}\n  Provider calls: {} ({} cache hits)\n  Cost: {:.4} (estimated {:.4})",
        job.column_id,
        job.status,
        job.message,
        job.processed_terms,
        job.total_terms,
        job.generated_count,
        job.generation_errors,
        job.evaluated_count,
        job.evaluation_errors,
        job.low_quality_count,
        job.improved_count,
        job.improvement_errors,
        job.finalized_count,
        job.ai_calls,
        job.cache_hits,
        job.actual_cost,
        job.estimated_cost,
    );
    if !job.errors.is_empty() {
        s.push_str(&format!("\n\nErrors ({}):", job.errors.len()));
        for record in &job.errors {
            s.push_str(&format!(
                "\n  - [{}] {}: {}",
                record.phase, record.term_id, record.message
            ));
        }
    }
    s
}

pub fn format_estimate(column_id: &str, estimate: &CostEstimate) -> String {
    format!(
        "Estimate for column '{}':\n  Terms: {}\n  Model tier: {}\n  Estimated cost: {:.4}",
        column_id, estimate.term_count, estimate.model_tier, estimate.estimated_cost
    )
}

pub fn format_quality_text(
    column_id: &str,
    summary: &QualitySummary,
    format: &str,
) -> Result<String, PipelineError> {
    if format == "json" {
        return to_json(summary);
    }

    let dist = &summary.distribution;
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.set_header(vec!["Bucket", "Scores", "Units"]);
    for (bucket, scores, units) in [
        ("excellent", "9-10", dist.excellent),
        ("good", "7-8", dist.good),
        ("needs work", "5-6", dist.needs_work),
        ("poor", "1-4", dist.poor),
    ] {
        table.add_row(vec![bucket.to_string(), scores.to_string(), units.to_string()]);
    }

    let mut s = format!(
        "Quality for column '{}': average {:.2} over {} evaluated units\n{}",
        column_id,
        summary.average_score,
        dist.total(),
        table
    );
    if !summary.sample_feedback.is_empty() {
        s.push_str("\n\nSample feedback:");
        for sample in &summary.sample_feedback {
            s.push_str(&format!(
                "\n  - {} ({}): {}",
                sample.term_id, sample.score, sample.feedback
            ));
        }
    }
    Ok(s)
}
