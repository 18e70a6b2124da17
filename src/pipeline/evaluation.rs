//! Evaluation phase
//!
//! Scores each generated unit with the column's evaluative prompt. A response that
//! cannot be parsed into a 1-10 score leaves the unit at `generated` and is counted
//! as an evaluation error; it never contributes to the quality statistics.

use super::{BatchReport, PhaseContext, UnitOutcome};
use crate::content::{ProcessingPhase, Term};
use crate::error::PipelineError;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tracing::{debug, error};

/// A parsed evaluation response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub score: u8,
    pub feedback: String,
}

/// Parse an evaluation response.
///
/// Accepts a JSON object `{"score": 8, "feedback": "..."}` (optionally wrapped in a
/// code fence or surrounding prose, score as number or string), or plain text with a
/// line such as `Score: 8/10`, in which case the remaining lines become the feedback.
pub fn parse_evaluation(text: &str) -> Result<Evaluation, PipelineError> {
    if let Some(evaluation) = parse_json(text)? {
        return Ok(evaluation);
    }
    parse_plain(text)
}

fn parse_json(text: &str) -> Result<Option<Evaluation>, PipelineError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Ok(None);
    };
    if end < start {
        return Ok(None);
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[start..=end]) else {
        return Ok(None);
    };
    let Some(raw_score) = map.get("score") else {
        return Ok(None);
    };
    let score = match raw_score {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| PipelineError::MalformedResponse(format!("score is not numeric: {raw_score}")))?;
    let feedback = map
        .get("feedback")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    Ok(Some(Evaluation {
        score: checked_score(score)?,
        feedback,
    }))
}

fn parse_plain(text: &str) -> Result<Evaluation, PipelineError> {
    let mut score = None;
    let mut feedback_lines = Vec::new();
    for line in text.lines() {
        if score.is_none() {
            if let Some(value) = score_on_line(line) {
                score = Some(value);
                continue;
            }
        }
        if !line.trim().is_empty() {
            feedback_lines.push(line.trim());
        }
    }
    let score = score.ok_or_else(|| {
        PipelineError::MalformedResponse("no score found in evaluation response".to_string())
    })?;
    Ok(Evaluation {
        score: checked_score(score)?,
        feedback: feedback_lines.join("\n"),
    })
}

/// The number that follows `score` on a line: `Score: 8`, `score = 7/10`,
/// `Score (1-10): 8`, `Score 9`. Parenthesized text after the keyword is skipped.
fn score_on_line(line: &str) -> Option<f64> {
    let lower = line.to_ascii_lowercase();
    let at = lower.find("score")?;
    let mut rest = String::new();
    let mut depth = 0usize;
    for c in line[at + "score".len()..].chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => rest.push(c),
            _ => {}
        }
    }
    let rest = rest.trim_start();
    let rest = rest
        .strip_prefix(|c: char| c == ':' || c == '=')
        .unwrap_or(rest)
        .trim_start();
    leading_number(rest)
}

fn leading_number(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..end].trim_end_matches('.').parse().ok()
}

fn checked_score(score: f64) -> Result<u8, PipelineError> {
    let rounded = score.round();
    if !(1.0..=10.0).contains(&rounded) {
        return Err(PipelineError::MalformedResponse(format!(
            "score {score} is outside 1-10"
        )));
    }
    Ok(rounded as u8)
}

/// Evaluate every unit of the batch concurrently.
pub async fn run_evaluation_batch(ctx: &PhaseContext, terms: Vec<Term>) -> BatchReport {
    let mut report = BatchReport::default();
    let mut futures = FuturesUnordered::new();
    for term in terms {
        futures.push(async move {
            let outcome = evaluate_term(ctx, &term).await;
            (term, outcome)
        });
    }

    while let Some((term, outcome)) = futures.next().await {
        report.outcomes.push(match outcome {
            Ok(true) => UnitOutcome::Flagged(term),
            Ok(false) => UnitOutcome::Settled(term),
            Err(err) => {
                error!(
                    column_id = %ctx.column.id,
                    term_id = %term.id,
                    phase = "evaluation",
                    error = %err,
                    "Evaluation failed"
                );
                ctx.tracker.record_evaluation_error(&term.id, &err);
                UnitOutcome::Failed(term, err)
            }
        });
    }
    report
}

/// Returns whether the unit goes on to the improvement phase.
async fn evaluate_term(ctx: &PhaseContext, term: &Term) -> Result<bool, PipelineError> {
    let mut unit = ctx.units.read_unit(&term.id, &ctx.column.id)?.ok_or_else(|| {
        PipelineError::InvalidTransition(format!(
            "no generated unit for ({}, {})",
            term.id, ctx.column.id
        ))
    })?;

    if unit.processing_phase != ProcessingPhase::Generated {
        debug!(
            column_id = %ctx.column.id,
            term_id = %term.id,
            phase = %unit.processing_phase,
            "Unit already evaluated"
        );
        return Ok(unit.processing_phase == ProcessingPhase::Evaluated
            && unit.needs_improvement
            && ctx.mode.improves());
    }

    let prompt = ctx
        .column
        .render_evaluative(&term.name, unit.current_content());
    let result = ctx.call(&term.id, &prompt, parse_evaluation).await?;
    let Evaluation { score, feedback } = result.value;

    unit.record_evaluation(score, feedback.clone(), ctx.quality_threshold, result.cost)?;
    let passed = !unit.needs_improvement;
    if passed {
        unit.finalize()?;
    }
    ctx.units.write_unit(&unit)?;

    ctx.tracker.record_evaluated(&term.id, score, &feedback);
    if passed {
        ctx.tracker.record_finalized();
    }
    debug!(
        column_id = %ctx.column.id,
        term_id = %term.id,
        score,
        passed,
        "Evaluated unit"
    );
    Ok(!passed && ctx.mode.improves())
}
