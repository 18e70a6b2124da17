//! Generation phase: one generative prompt per term, written through as a `generated` unit.

use super::{BatchReport, PhaseContext, UnitOutcome};
use crate::content::{ContentUnit, ProcessingPhase, Term};
use crate::error::PipelineError;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error};

/// Generate content for every term of the batch concurrently.
pub async fn run_generation_batch(ctx: &PhaseContext, terms: Vec<Term>) -> BatchReport {
    let mut report = BatchReport::default();
    let mut futures = FuturesUnordered::new();
    for term in terms {
        futures.push(async move {
            let outcome = generate_term(ctx, &term).await;
            (term, outcome)
        });
    }

    while let Some((term, outcome)) = futures.next().await {
        match outcome {
            Ok(next) => {
                ctx.tracker.record_generated();
                report.outcomes.push(match next {
                    Next::Evaluate => UnitOutcome::Advanced(term),
                    Next::Improve => UnitOutcome::Flagged(term),
                    Next::Done => UnitOutcome::Settled(term),
                });
            }
            Err(err) => {
                error!(
                    column_id = %ctx.column.id,
                    term_id = %term.id,
                    phase = "generation",
                    error = %err,
                    "Generation failed"
                );
                ctx.tracker.record_generation_error(&term.id, &err);
                report.outcomes.push(UnitOutcome::Failed(term, err));
            }
        }
    }
    report
}

enum Next {
    Evaluate,
    Improve,
    Done,
}

async fn generate_term(ctx: &PhaseContext, term: &Term) -> Result<Next, PipelineError> {
    let existing = ctx.units.read_unit(&term.id, &ctx.column.id)?;

    // A unit already past generation for this prompt version is reused as is.
    if let Some(unit) = existing.as_ref().filter(|u| {
        u.prompt_version == ctx.column.prompt_version
            && u.processing_phase > ProcessingPhase::Generated
    }) {
        debug!(
            column_id = %ctx.column.id,
            term_id = %term.id,
            phase = %unit.processing_phase,
            "Adopting existing unit"
        );
        let flagged = unit.processing_phase == ProcessingPhase::Evaluated && unit.needs_improvement;
        return Ok(if flagged && ctx.mode.improves() {
            Next::Improve
        } else {
            Next::Done
        });
    }

    // Anything else past `generated`, or written by a newer prompt, cannot be replaced.
    if let Some(unit) = existing.as_ref().filter(|u| {
        u.processing_phase > ProcessingPhase::Generated
            || u.prompt_version > ctx.column.prompt_version
    }) {
        return Err(PipelineError::InvalidTransition(format!(
            "unit ({}, {}) is {} at prompt version {}; version {} cannot regenerate it",
            term.id,
            ctx.column.id,
            unit.processing_phase,
            unit.prompt_version,
            ctx.column.prompt_version
        )));
    }

    let prompt = ctx.column.render_generative(&term.name);
    let result = ctx.call(&term.id, &prompt, ctx.content_validator()).await?;
    let unit = ContentUnit::generated(
        term.id.clone(),
        ctx.column.id.clone(),
        result.value,
        ctx.column.prompt_version,
        result.tier,
        result.cost,
    );
    ctx.units.write_unit(&unit)?;
    debug!(
        column_id = %ctx.column.id,
        term_id = %term.id,
        cached = result.cached,
        "Generated unit"
    );

    Ok(if ctx.mode.evaluates() {
        Next::Evaluate
    } else {
        Next::Done
    })
}
