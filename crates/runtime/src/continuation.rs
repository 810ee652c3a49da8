//! Applying a task's continuation to its outcome.

use tracing::debug;

use nimbus_core::{Outcome, OutcomeKind, Payload, TaskFault};
use nimbus_primitives::{PrimitiveError, Resources};

use crate::error::RuntimeError;
use crate::task::Continuation;

/// Record `outcome` through `continuation`.
///
/// Only process records are required to exist. Any other target that is
/// gone was disposed by a parent that no longer waits, and the outcome is
/// dropped.
pub(crate) async fn apply(
    resources: &Resources,
    continuation: &Continuation,
    outcome: Outcome,
) -> Result<(), RuntimeError> {
    match write(resources, continuation, outcome).await {
        Err(RuntimeError::Primitive(PrimitiveError::NotFound { kind, id }))
            if !matches!(continuation, Continuation::WriteProcess { .. }) =>
        {
            debug!(kind, id = %id, "continuation target disposed, outcome dropped");
            Ok(())
        }
        written => written,
    }
}

async fn write(resources: &Resources, continuation: &Continuation, outcome: Outcome) -> Result<(), RuntimeError> {
    match continuation {
        Continuation::WriteCell { cell } => {
            resources.cells.set_result(*cell, outcome).await?;
        }

        Continuation::WriteProcess { process, cell } => {
            let kind = outcome.kind();
            // cell first: pollers read the record to decide when to fetch the cell
            resources.cells.set_result(*cell, outcome).await?;
            let updated = match kind {
                OutcomeKind::Completed => resources.processes.set_completed(*process).await,
                OutcomeKind::Exception => resources.processes.set_faulted(*process).await,
                OutcomeKind::Cancelled => resources.processes.set_killed(*process).await,
            };
            match updated {
                Ok(()) => {}
                Err(PrimitiveError::InvalidTransition { from, .. }) if from.is_terminal() => {
                    debug!(process_id = %process, status = ?from, "process already terminal");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Continuation::ParallelSlot {
            aggregator,
            remaining,
            index,
        } => {
            let Outcome::Completed(value) = outcome else {
                return Err(RuntimeError::InvalidOperation(format!(
                    "parallel slot {index} received a {} outcome",
                    outcome.kind()
                )));
            };
            if resources.aggregators.set(*aggregator, *index, value).await? {
                resources.counters.decrement(*remaining).await?;
            }
        }

        Continuation::ParallelFault { cell, cancellation } => {
            if resources.cells.set_result(*cell, outcome).await? {
                resources.cancellation.cancel(*cancellation).await?;
            }
        }

        Continuation::ChoiceWin { cell, cancellation } => {
            if resources.cells.set_result(*cell, outcome).await? {
                resources.cancellation.cancel(*cancellation).await?;
            }
        }

        Continuation::ChoiceMiss {
            cell,
            misses,
            remaining,
            index,
        } => {
            let encoded = Payload::encode(&outcome)?;
            if !resources.aggregators.set(*misses, *index, encoded).await? {
                return Ok(());
            }
            if resources.counters.decrement(*remaining).await? > 0 {
                return Ok(());
            }
            let slots = resources.aggregators.values(*misses).await?.ok_or_else(|| {
                RuntimeError::InvalidOperation("choice counter drained before every miss was stored".into())
            })?;
            let outcomes = slots
                .iter()
                .map(|slot| slot.decode::<Outcome>())
                .collect::<Result<Vec<_>, _>>()?;
            resources
                .cells
                .set_result(*cell, derive_choice_failure(outcomes))
                .await?;
        }
    }
    Ok(())
}

/// Outcome of a choice in which no branch succeeded.
///
/// Any fault makes the result an exception: one fault is reported as itself,
/// several as an aggregate. If every branch was cancelled the choice is
/// cancelled.
pub fn derive_choice_failure(outcomes: Vec<Outcome>) -> Outcome {
    let mut faults = Vec::new();
    let mut reason = None;
    for outcome in outcomes {
        match outcome {
            Outcome::Exception(fault) => faults.push(fault),
            Outcome::Cancelled(r) => {
                reason.get_or_insert(r);
            }
            Outcome::Completed(_) => {}
        }
    }
    match faults.len() {
        0 => Outcome::Cancelled(reason.unwrap_or_else(|| "every choice was cancelled".to_string())),
        1 => Outcome::Exception(faults.remove(0)),
        _ => Outcome::Exception(TaskFault::Aggregate(faults)),
    }
}
