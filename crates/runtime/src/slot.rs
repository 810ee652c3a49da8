//! Worker capacity held by a running task.
//!
//! A task that blocks on children it queued gives its slot back for the
//! length of the wait, so the worker running it can admit those children.

use std::sync::Arc;

/// The capacity a task occupies on whatever is running it.
///
/// Calls nest: every `suspend` is matched by exactly one `resume`, and
/// implementations only give capacity back on the outermost pair.
pub trait TaskSlot: Send + Sync {
    fn suspend(&self);
    fn resume(&self);
}

/// Optional [`TaskSlot`] carried by a task's scheduling provider.
#[derive(Clone, Default)]
pub struct SlotHandle(Option<Arc<dyn TaskSlot>>);

impl SlotHandle {
    pub fn new(slot: Arc<dyn TaskSlot>) -> Self {
        Self(Some(slot))
    }

    /// A handle that tracks nothing, for tasks run outside a worker.
    pub fn detached() -> Self {
        Self(None)
    }

    /// Suspend the slot until the returned guard is dropped.
    pub(crate) fn suspend(&self) -> SuspendedSlot<'_> {
        if let Some(slot) = &self.0 {
            slot.suspend();
        }
        SuspendedSlot { handle: self }
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SlotHandle").field(&self.0.is_some()).finish()
    }
}

pub(crate) struct SuspendedSlot<'a> {
    handle: &'a SlotHandle,
}

impl Drop for SuspendedSlot<'_> {
    fn drop(&mut self) {
        if let Some(slot) = &self.handle.0 {
            slot.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Default)]
    struct Tally(AtomicI32);

    impl TaskSlot for Tally {
        fn suspend(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_resumes_on_drop() {
        let tally = Arc::new(Tally::default());
        let handle = SlotHandle::new(tally.clone());
        {
            let _outer = handle.suspend();
            let _inner = handle.suspend();
            assert_eq!(tally.0.load(Ordering::SeqCst), 2);
        }
        assert_eq!(tally.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn detached_handle_is_inert() {
        let handle = SlotHandle::detached();
        drop(handle.suspend());
        assert_eq!(format!("{handle:?}"), "SlotHandle(false)");
    }
}
