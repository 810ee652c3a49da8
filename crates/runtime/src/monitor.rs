//! Per-task completion latch.
//!
//! A [`CompletionMonitor`] starts `Pending` and makes exactly one transition,
//! to `Completed` or `Faulted`. Later triggers are no-ops. The monitor is
//! handed to a task's execution context when the task is started; nothing
//! looks it up from ambient state.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;

use nimbus_core::TaskFault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Completed,
    Faulted(TaskFault),
}

impl CompletionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone)]
pub struct CompletionMonitor {
    state: Arc<watch::Sender<CompletionState>>,
}

impl Default for CompletionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CompletionState::Pending);
        Self { state: Arc::new(tx) }
    }

    /// Move to `Faulted` unless already terminal. Returns `true` if this call fired.
    pub fn trigger_fault(&self, fault: TaskFault) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = CompletionState::Faulted(fault);
            true
        })
    }

    /// Move to `Completed` unless already terminal. Returns `true` if this call fired.
    pub fn trigger_completion(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = CompletionState::Completed;
            true
        })
    }

    pub fn state(&self) -> CompletionState {
        self.state.borrow().clone()
    }

    /// Wait for the terminal state. A fault is returned with any
    /// single-cause aggregate wrapper removed.
    pub async fn await_completion(&self) -> Result<(), TaskFault> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(CompletionState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(TaskFault::failed("monitor", "completion monitor closed")),
        };
        match state {
            CompletionState::Faulted(fault) => Err(fault.unwrap_single()),
            _ => Ok(()),
        }
    }

    /// Run synchronous task code, routing an error or panic into [`trigger_fault`].
    ///
    /// [`trigger_fault`]: Self::trigger_fault
    pub fn protect_sync<T, E, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<TaskFault>,
    {
        match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.trigger_fault(e.into());
                None
            }
            Err(panic) => {
                self.trigger_fault(TaskFault::from_panic(panic));
                None
            }
        }
    }

    /// Async counterpart of [`protect_sync`](Self::protect_sync).
    pub async fn protect_async<T, E, F>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<TaskFault>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.trigger_fault(e.into());
                None
            }
            Err(panic) => {
                self.trigger_fault(TaskFault::from_panic(panic));
                None
            }
        }
    }
}

impl std::fmt::Debug for CompletionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CompletionMonitor").field(&*self.state.borrow()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completion_then_fault_keeps_completion() {
        let monitor = CompletionMonitor::new();
        assert!(monitor.trigger_completion());
        assert!(!monitor.trigger_fault(TaskFault::failed("late", "ignored")));
        assert!(!monitor.trigger_completion());
        assert_eq!(monitor.state(), CompletionState::Completed);
        assert!(monitor.await_completion().await.is_ok());
    }

    #[tokio::test]
    async fn fault_then_completion_keeps_fault() {
        let monitor = CompletionMonitor::new();
        let fault = TaskFault::failed("io", "broken pipe");
        assert!(monitor.trigger_fault(fault.clone()));
        assert!(!monitor.trigger_completion());
        assert_eq!(monitor.await_completion().await, Err(fault));
    }

    #[tokio::test]
    async fn await_unwraps_single_cause_aggregate() {
        let monitor = CompletionMonitor::new();
        let inner = TaskFault::failed("db", "timeout");
        monitor.trigger_fault(TaskFault::Aggregate(vec![inner.clone()]));
        assert_eq!(monitor.await_completion().await, Err(inner));
    }

    #[tokio::test]
    async fn waiter_wakes_on_later_trigger() {
        let monitor = CompletionMonitor::new();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.await_completion().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.trigger_completion();

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn protect_sync_routes_errors_and_panics() {
        let monitor = CompletionMonitor::new();
        let value = monitor.protect_sync(|| Ok::<_, TaskFault>(7));
        assert_eq!(value, Some(7));
        assert_eq!(monitor.state(), CompletionState::Pending);

        let panicking = CompletionMonitor::new();
        let none: Option<()> = panicking.protect_sync(|| -> Result<(), TaskFault> { panic!("kaboom") });
        assert!(none.is_none());
        assert_eq!(
            panicking.state(),
            CompletionState::Faulted(TaskFault::Panicked("kaboom".into()))
        );
    }

    #[tokio::test]
    async fn protect_async_routes_errors() {
        let monitor = CompletionMonitor::new();
        let out: Option<()> = monitor
            .protect_async(async { Err(TaskFault::failed("body", "threw")) })
            .await;
        assert!(out.is_none());
        assert_eq!(
            monitor.await_completion().await,
            Err(TaskFault::failed("body", "threw"))
        );
    }
}
