//! Terminal outcomes of tasks and processes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::Payload;

/// A failure raised by a task body.
///
/// Faults are plain data so they can be written into result cells and read
/// back on another machine with their identity intact.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TaskFault {
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("{} faults: {}", .0.len(), join_faults(.0))]
    Aggregate(Vec<TaskFault>),
}

fn join_faults(faults: &[TaskFault]) -> String {
    faults
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TaskFault {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Build a fault from a caught panic payload.
    pub fn from_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Strip aggregate wrappers that hold a single inner cause.
    pub fn unwrap_single(self) -> Self {
        match self {
            Self::Aggregate(mut inner) if inner.len() == 1 => {
                inner.pop().map(Self::unwrap_single).unwrap_or(Self::Aggregate(inner))
            }
            other => other,
        }
    }
}

/// Discriminant of an [`Outcome`], handy for logging and status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Completed,
    Exception,
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Exception => "exception",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The single value a result cell ever holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Completed(Payload),
    Exception(TaskFault),
    Cancelled(String),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Completed(_) => OutcomeKind::Completed,
            Self::Exception(_) => OutcomeKind::Exception,
            Self::Cancelled(_) => OutcomeKind::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_single_strips_nested_wrappers() {
        let inner = TaskFault::failed("io", "disk gone");
        let wrapped = TaskFault::Aggregate(vec![TaskFault::Aggregate(vec![inner.clone()])]);
        assert_eq!(wrapped.unwrap_single(), inner);
    }

    #[test]
    fn unwrap_single_keeps_real_aggregates() {
        let agg = TaskFault::Aggregate(vec![
            TaskFault::failed("a", "1"),
            TaskFault::failed("b", "2"),
        ]);
        assert_eq!(agg.clone().unwrap_single(), agg);
    }

    #[test]
    fn aggregate_display_lists_causes() {
        let agg = TaskFault::Aggregate(vec![
            TaskFault::failed("a", "one"),
            TaskFault::Panicked("boom".into()),
        ]);
        let text = agg.to_string();
        assert!(text.starts_with("2 faults"));
        assert!(text.contains("a: one"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn from_panic_reads_string_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(TaskFault::from_panic(caught), TaskFault::Panicked("bad 1".into()));
    }

    #[test]
    fn outcome_kinds() {
        assert_eq!(Outcome::Cancelled("x".into()).kind(), OutcomeKind::Cancelled);
        assert!(Outcome::Completed(Payload::default()).is_completed());
        assert_eq!(OutcomeKind::Exception.to_string(), "exception");
    }
}
