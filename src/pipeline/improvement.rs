//! Improvement phase: one rewrite per flagged unit, then `final`. Improved text is not re-scored.

use super::{BatchReport, PhaseContext, UnitOutcome};
use crate::content::{ProcessingPhase, Term};
use crate::error::PipelineError;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error};

pub async fn run_improvement_batch(ctx: &PhaseContext, terms: Vec<Term>) -> BatchReport {
    let mut report = BatchReport::default();
    let mut futures = FuturesUnordered::new();
    for term in terms {
        futures.push(async move {
            let outcome = improve_term(ctx, &term).await;
            (term, outcome)
        });
    }

    while let Some((term, outcome)) = futures.next().await {
        report.outcomes.push(match outcome {
            Ok(()) => UnitOutcome::Settled(term),
            Err(err) => {
                error!(
                    column_id = %ctx.column.id,
                    term_id = %term.id,
                    phase = "improvement",
                    error = %err,
                    "Improvement failed"
                );
                ctx.tracker.record_improvement_error(&term.id, &err);
                UnitOutcome::Failed(term, err)
            }
        });
    }
    report
}

async fn improve_term(ctx: &PhaseContext, term: &Term) -> Result<(), PipelineError> {
    let mut unit = ctx.units.read_unit(&term.id, &ctx.column.id)?.ok_or_else(|| {
        PipelineError::InvalidTransition(format!(
            "no evaluated unit for ({}, {})",
            term.id, ctx.column.id
        ))
    })?;

    if unit.processing_phase != ProcessingPhase::Evaluated || !unit.needs_improvement {
        debug!(
            column_id = %ctx.column.id,
            term_id = %term.id,
            phase = %unit.processing_phase,
            "Unit does not need improvement"
        );
        return Ok(());
    }

    let feedback = unit.evaluation_feedback.clone().unwrap_or_default();
    let prompt = ctx
        .column
        .render_improvement(&term.name, unit.current_content(), &feedback);
    let result = ctx.call(&term.id, &prompt, ctx.content_validator()).await?;

    unit.record_improvement(result.value, result.cost)?;
    ctx.units.write_unit(&unit)?;

    ctx.tracker.record_improved();
    ctx.tracker.record_finalized();
    debug!(
        column_id = %ctx.column.id,
        term_id = %term.id,
        cached = result.cached,
        "Improved unit"
    );
    Ok(())
}
