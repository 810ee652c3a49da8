//! Task scheduling and distributed execution coordination.
//!
//! Clients submit workflows through [`RuntimeState`]; workers take tasks off
//! the queue and run them with [`execute_task`]. Inside a workflow the
//! [`ExecutionContext`] schedules Parallel, Choice and StartChild work
//! according to the current [`SchedulingContext`].

pub mod context;
pub mod continuation;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod execution;
pub mod handle;
pub mod monitor;
pub mod provider;
pub mod slot;
pub mod state;
pub mod task;
pub mod workflow;

pub use context::ExecutionContext;
pub use continuation::derive_choice_failure;
pub use dependency::{BlobDependencyExporter, DependencyExporter};
pub use descriptor::RuntimeDescriptor;
pub use error::RuntimeError;
pub use execution::execute_task;
pub use handle::{decode_outcome, outcome_value, CellHandle, ProcessHandle};
pub use monitor::{CompletionMonitor, CompletionState};
pub use provider::{ChildHandle, RuntimeProvider, SchedulingContext};
pub use slot::{SlotHandle, TaskSlot};
pub use state::{DequeuedTask, RuntimeState};
pub use task::{Continuation, Continuations, Task, TaskSpec};
pub use workflow::{FnWorkflow, Workflow, WorkflowCall, WorkflowRegistry};
