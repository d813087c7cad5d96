//! Per-task context.
//!
//! A [`Cx`] is the capability a task holds on the runtime: the handle
//! table, the timer heap, the clock, and the task's own cancellation flag.
//! Channel operations take `&Cx` instead of reaching for ambient state, so
//! everything a task can do is visible in its signature. Contexts clone
//! cheaply and clones share the cancellation flag.

use crate::error::{Error, ErrorKind};
use crate::handle::{Handle, HandleTable};
use crate::runtime::RtShared;
use crate::time::{Deadline, Time};
use crate::wait::WaitCell;
use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tracing::trace;

/// A unique identifier for a task in the runtime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TaskId {
    /// The synthetic task behind [`Runtime::cx`](crate::runtime::Runtime::cx).
    pub(crate) const ROOT: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ROOT {
            f.write_str("t-root")
        } else {
            write!(f, "t{}", self.index)
        }
    }
}

#[derive(Debug)]
struct CxInner {
    task: TaskId,
    cancel: AtomicBool,
    shared: Arc<RtShared>,
}

/// The capability context of one task.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    pub(crate) fn new(task: TaskId, shared: Arc<RtShared>) -> Self {
        Self {
            inner: Arc::new(CxInner {
                task,
                cancel: AtomicBool::new(false),
                shared,
            }),
        }
    }

    /// The identity of the task this context belongs to.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.inner.task
    }

    /// Reads the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.shared.clock_now()
    }

    /// Builds a deadline the given duration from now.
    #[must_use]
    pub fn deadline_after(&self, duration: Duration) -> Deadline {
        Deadline::after(self.now(), duration)
    }

    /// The blocking-permission probe: fails with `Cancelled` once the task
    /// is being torn down. Every channel entry point calls this first.
    pub fn checkpoint(&self) -> Result<(), Error> {
        if self.cancel_requested() {
            Err(Error::new(ErrorKind::Cancelled))
        } else {
            Ok(())
        }
    }

    /// Returns true once cancellation has been requested for this task.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    /// Sets or clears the cancellation flag.
    pub fn set_cancel_requested(&self, cancelled: bool) {
        self.inner.cancel.store(cancelled, Ordering::SeqCst);
    }

    /// Closes a handle, removing it from the table and running the
    /// object's close protocol.
    ///
    /// # Errors
    ///
    /// `BadHandle` if the handle is unknown or already closed.
    pub fn close(&self, handle: Handle) -> Result<(), Error> {
        let object = self
            .inner
            .shared
            .handles
            .lock()
            .expect("handle table poisoned")
            .remove(handle)?;
        trace!(task = %self.task(), %handle, "handle closed");
        object.close();
        Ok(())
    }

    /// Marks the direction flowing out of `handle` as finished.
    ///
    /// # Errors
    ///
    /// `BadHandle` if the handle is unknown; `BrokenPipe` if the direction
    /// is already done.
    pub fn done(&self, handle: Handle) -> Result<(), Error> {
        let table = self
            .inner
            .shared
            .handles
            .lock()
            .expect("handle table poisoned");
        table.get(handle)?.done()
    }

    /// Number of live handles in the table.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.inner
            .shared
            .handles
            .lock()
            .expect("handle table poisoned")
            .len()
    }

    pub(crate) fn handles(&self) -> MutexGuard<'_, HandleTable> {
        self.inner
            .shared
            .handles
            .lock()
            .expect("handle table poisoned")
    }

    pub(crate) fn arm_timer(&self, deadline: Time, cell: &WaitCell, tag: usize) {
        self.inner
            .shared
            .timers
            .lock()
            .expect("timer heap poisoned")
            .arm(deadline, cell, tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_runtime;

    #[test]
    fn checkpoint_fails_once_cancelled() {
        let rt = test_runtime();
        let cx = rt.cx();
        assert!(cx.checkpoint().is_ok());

        cx.set_cancel_requested(true);
        assert_eq!(cx.checkpoint().unwrap_err().kind(), ErrorKind::Cancelled);

        cx.set_cancel_requested(false);
        assert!(cx.checkpoint().is_ok());
    }

    #[test]
    fn clones_share_the_cancellation_flag() {
        let rt = test_runtime();
        let cx = rt.cx();
        let other = cx.clone();

        other.set_cancel_requested(true);
        assert!(cx.cancel_requested());
    }

    #[test]
    fn deadline_after_uses_the_runtime_clock() {
        let rt = test_runtime();
        rt.advance_time(5_000_000);
        let cx = rt.cx();

        let deadline = cx.deadline_after(Duration::from_millis(10));
        assert_eq!(deadline.time(), Some(Time::from_millis(15)));
    }

    #[test]
    fn close_of_unknown_handle_is_bad_handle() {
        let rt = test_runtime();
        let cx = rt.cx();
        let [a, _b] = crate::chan::make(&cx).expect("make");
        cx.close(a).expect("close");

        assert_eq!(cx.close(a).unwrap_err().kind(), ErrorKind::BadHandle);
        assert_eq!(cx.done(a).unwrap_err().kind(), ErrorKind::BadHandle);
    }

    #[test]
    fn task_ids_display_compactly() {
        assert_eq!(TaskId::new(3, 1).to_string(), "t3");
        assert_eq!(TaskId::ROOT.to_string(), "t-root");
    }
}
