//! The task record shipped through the queue.

use serde::{Deserialize, Serialize};

use nimbus_core::{
    AggregatorId, CancellationId, CellId, CounterId, DependencyId, OutcomeKind, ProcessId, TaskId,
};

use crate::workflow::WorkflowCall;

/// What happens to a task's outcome once its body finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuation {
    /// Write the outcome into a result cell.
    WriteCell { cell: CellId },
    /// Write the outcome into the process cell, then move the process record
    /// to its terminal status.
    WriteProcess { process: ProcessId, cell: CellId },
    /// Store a parallel child's value in slot `index`, then count it.
    ParallelSlot {
        aggregator: AggregatorId,
        remaining: CounterId,
        index: usize,
    },
    /// Report a parallel child's fault or cancellation and stop its siblings.
    ParallelFault {
        cell: CellId,
        cancellation: CancellationId,
    },
    /// Claim a choice for the first successful child and stop its siblings.
    ChoiceWin {
        cell: CellId,
        cancellation: CancellationId,
    },
    /// Record a failed choice child; the last one writes the derived outcome.
    ChoiceMiss {
        cell: CellId,
        misses: AggregatorId,
        remaining: CounterId,
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuations {
    pub on_success: Continuation,
    pub on_exception: Continuation,
    pub on_cancelled: Continuation,
}

impl Continuations {
    pub fn cell(cell: CellId) -> Self {
        let write = Continuation::WriteCell { cell };
        Self {
            on_success: write.clone(),
            on_exception: write.clone(),
            on_cancelled: write,
        }
    }

    pub fn process(process: ProcessId, cell: CellId) -> Self {
        let write = Continuation::WriteProcess { process, cell };
        Self {
            on_success: write.clone(),
            on_exception: write.clone(),
            on_cancelled: write,
        }
    }

    pub fn parallel(
        aggregator: AggregatorId,
        remaining: CounterId,
        index: usize,
        fault_cell: CellId,
        cancellation: CancellationId,
    ) -> Self {
        let fault = Continuation::ParallelFault {
            cell: fault_cell,
            cancellation,
        };
        Self {
            on_success: Continuation::ParallelSlot {
                aggregator,
                remaining,
                index,
            },
            on_exception: fault.clone(),
            on_cancelled: fault,
        }
    }

    pub fn choice(
        cell: CellId,
        cancellation: CancellationId,
        misses: AggregatorId,
        remaining: CounterId,
        index: usize,
    ) -> Self {
        let miss = Continuation::ChoiceMiss {
            cell,
            misses,
            remaining,
            index,
        };
        Self {
            on_success: Continuation::ChoiceWin { cell, cancellation },
            on_exception: miss.clone(),
            on_cancelled: miss,
        }
    }

    pub fn for_outcome(&self, kind: OutcomeKind) -> &Continuation {
        match kind {
            OutcomeKind::Completed => &self.on_success,
            OutcomeKind::Exception => &self.on_exception,
            OutcomeKind::Cancelled => &self.on_cancelled,
        }
    }
}

/// Everything needed to enqueue one task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub process_id: ProcessId,
    pub dependencies: Vec<DependencyId>,
    pub cancellation: CancellationId,
    pub continuations: Continuations,
    pub call: WorkflowCall,
    pub result_type: String,
    pub process_root: bool,
}

/// One schedulable unit of work, as stored in the queue.
///
/// A worker consumes the task by value when it starts it, so each dequeue
/// runs the body at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub process_id: ProcessId,
    /// Type name of the value the body produces.
    pub result_type: String,
    pub call: WorkflowCall,
    pub cancellation: CancellationId,
    pub continuations: Continuations,
    /// The root task of a process marks its record `Running` when it starts.
    pub process_root: bool,
}

impl Task {
    /// Build a task with a fresh id. Dependencies travel on the queue item,
    /// not in the task itself.
    pub fn from_spec(spec: TaskSpec) -> (Self, Vec<DependencyId>) {
        let task = Self {
            task_id: TaskId::new(),
            process_id: spec.process_id,
            result_type: spec.result_type,
            call: spec.call,
            cancellation: spec.cancellation,
            continuations: spec.continuations,
            process_root: spec.process_root,
        };
        (task, spec.dependencies)
    }
}
