//! The cooperative runtime.
//!
//! A single-threaded executor with deterministic scheduling: tasks are
//! pinned futures polled from a FIFO ready queue, wakers reschedule their
//! task, and armed deadlines live in a timer heap. Under a virtual clock
//! the loop advances time to the next deadline when nothing is runnable,
//! so timeout behavior is reproducible; under a wall clock it sleeps
//! instead. Nothing here takes more than one lock at a time and no state
//! transition happens outside a poll or a synchronous runtime call, which
//! is what lets the channel layer get by without any locking discipline of
//! its own.

mod config;
mod scheduler;
mod timer;

pub use config::{ClockMode, ConfigError, RuntimeConfig};

use crate::cx::{Cx, TaskId};
use crate::handle::HandleTable;
use crate::time::{Time, TimeSource, VirtualClock, WallClock};
use scheduler::Scheduler;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use timer::TimerHeap;
use tracing::{debug, trace};

/// Clock driving a runtime instance.
#[derive(Debug)]
pub(crate) enum Clock {
    Wall(WallClock),
    Virtual(VirtualClock),
}

impl Clock {
    fn now(&self) -> Time {
        match self {
            Self::Wall(clock) => clock.now(),
            Self::Virtual(clock) => clock.now(),
        }
    }
}

/// Runtime services shared with every task context.
#[derive(Debug)]
pub(crate) struct RtShared {
    pub(crate) scheduler: Arc<Mutex<Scheduler>>,
    pub(crate) timers: Mutex<TimerHeap>,
    pub(crate) handles: Mutex<HandleTable>,
    pub(crate) clock: Clock,
}

impl RtShared {
    pub(crate) fn clock_now(&self) -> Time {
        self.clock.now()
    }
}

struct TaskWaker {
    task: TaskId,
    scheduler: Arc<Mutex<Scheduler>>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.scheduler
            .lock()
            .expect("scheduler poisoned")
            .schedule(self.task);
    }
}

struct TaskEntry {
    id: TaskId,
    cx: Cx,
    future: Pin<Box<dyn Future<Output = ()>>>,
}

/// The cooperative executor.
pub struct Runtime {
    shared: Arc<RtShared>,
    tasks: slab::Slab<TaskEntry>,
    next_generation: u32,
    config: RuntimeConfig,
    steps: u64,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Starts building a runtime.
    #[must_use]
    pub fn builder() -> RuntimeConfig {
        RuntimeConfig::new()
    }

    /// Creates a runtime from an explicit configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let clock = match config.clock {
            ClockMode::Wall => Clock::Wall(WallClock::new()),
            ClockMode::Virtual => Clock::Virtual(VirtualClock::new()),
        };
        Self {
            shared: Arc::new(RtShared {
                scheduler: Arc::new(Mutex::new(Scheduler::new())),
                timers: Mutex::new(TimerHeap::new()),
                handles: Mutex::new(HandleTable::new(config.max_handles)),
                clock,
            }),
            tasks: slab::Slab::new(),
            next_generation: 1,
            config,
            steps: 0,
        }
    }

    /// A context not tied to any task, for setup and teardown code.
    ///
    /// It is never cancelled and must not be used to await channel
    /// operations; spawn a task for that.
    #[must_use]
    pub fn cx(&self) -> Cx {
        Cx::new(TaskId::ROOT, Arc::clone(&self.shared))
    }

    /// Reads the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.shared.clock_now()
    }

    /// Advances a virtual clock by `nanos`. Ignored under a wall clock.
    pub fn advance_time(&self, nanos: u64) {
        match &self.shared.clock {
            Clock::Virtual(clock) => clock.advance(nanos),
            Clock::Wall(_) => {
                tracing::warn!("advance_time ignored: runtime uses the wall clock");
            }
        }
    }

    /// Spawns a task, handing it a fresh context.
    pub fn spawn<F, Fut>(&mut self, f: F) -> TaskId
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);

        let entry = self.tasks.vacant_entry();
        let id = TaskId::new(entry.key() as u32, generation);
        let cx = Cx::new(id, Arc::clone(&self.shared));
        let future = Box::pin(f(cx.clone()));
        entry.insert(TaskEntry { id, cx, future });

        self.shared
            .scheduler
            .lock()
            .expect("scheduler poisoned")
            .schedule(id);
        debug!(task = %id, "task spawned");
        id
    }

    /// Requests cooperative cancellation of a task and wakes it.
    ///
    /// The task observes the request at its next checkpoint or parked poll
    /// and fails pending operations with `Cancelled`.
    pub fn cancel(&mut self, task: TaskId) {
        let Some(entry) = self.tasks.get(task.index as usize) else {
            return;
        };
        if entry.id != task {
            return;
        }
        entry.cx.set_cancel_requested(true);
        self.shared
            .scheduler
            .lock()
            .expect("scheduler poisoned")
            .schedule(task);
        debug!(task = %task, "cancellation requested");
    }

    /// Returns true once the task has run to completion.
    #[must_use]
    pub fn is_finished(&self, task: TaskId) -> bool {
        !self
            .tasks
            .get(task.index as usize)
            .is_some_and(|entry| entry.id == task)
    }

    /// Number of tasks that have not completed, runnable or parked.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Runs until no task is runnable and no armed deadline remains.
    ///
    /// Parked tasks without a deadline stay parked; they do not keep the
    /// loop alive. Returns the number of polls performed.
    pub fn run_until_quiescent(&mut self) -> u64 {
        let start = self.steps;
        loop {
            if let Some(max) = self.config.max_steps {
                if self.steps - start >= max {
                    debug!(max, "run stopped at step bound");
                    break;
                }
            }
            let next = self
                .shared
                .scheduler
                .lock()
                .expect("scheduler poisoned")
                .pop();
            if let Some(task) = next {
                self.steps += 1;
                self.poll_task(task);
                continue;
            }

            // Nothing runnable: deliver due timers, then idle toward the
            // next deadline if one exists.
            let now = self.now();
            let fired = self
                .shared
                .timers
                .lock()
                .expect("timer heap poisoned")
                .fire_due(now);
            if fired > 0 {
                continue;
            }
            let deadline = self
                .shared
                .timers
                .lock()
                .expect("timer heap poisoned")
                .next_deadline();
            let Some(deadline) = deadline else { break };
            match &self.shared.clock {
                Clock::Virtual(clock) if self.config.auto_advance => {
                    trace!(%deadline, "advancing virtual clock to next deadline");
                    clock.advance_to(deadline);
                }
                Clock::Virtual(_) => break,
                Clock::Wall(_) => {
                    let wait = deadline.duration_since(now);
                    std::thread::sleep(std::time::Duration::from_nanos(wait));
                }
            }
        }
        self.steps - start
    }

    fn poll_task(&mut self, task: TaskId) {
        let Some(entry) = self.tasks.get_mut(task.index as usize) else {
            return;
        };
        if entry.id != task {
            return;
        }
        let waker = Waker::from(Arc::new(TaskWaker {
            task,
            scheduler: Arc::clone(&self.shared.scheduler),
        }));
        let mut poll_cx = Context::from_waker(&waker);
        match entry.future.as_mut().poll(&mut poll_cx) {
            Poll::Ready(()) => {
                self.tasks.remove(task.index as usize);
                debug!(task = %task, "task completed");
            }
            Poll::Pending => {}
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tasks", &self.tasks.len())
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_runtime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns Pending once, waking itself immediately.
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[test]
    fn spawned_tasks_run_to_completion() {
        let mut rt = test_runtime();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            rt.spawn(move |_cx| async move {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        let steps = rt.run_until_quiescent();

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(steps, 3);
        assert_eq!(rt.pending_tasks(), 0);
    }

    #[test]
    fn woken_task_is_polled_again() {
        let mut rt = test_runtime();
        let task = rt.spawn(|_cx| YieldOnce(false));
        rt.run_until_quiescent();
        assert!(rt.is_finished(task));
    }

    #[test]
    fn is_finished_tracks_completion() {
        let mut rt = test_runtime();
        let task = rt.spawn(|_cx| async {});
        assert!(!rt.is_finished(task));

        rt.run_until_quiescent();
        assert!(rt.is_finished(task));
    }

    #[test]
    fn step_bound_stops_a_livelocked_run() {
        let mut rt = Runtime::builder().virtual_time().max_steps(16).build();

        // A task that wakes itself forever.
        struct Spin;
        impl Future for Spin {
            type Output = ();
            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
        rt.spawn(|_cx| Spin);

        assert_eq!(rt.run_until_quiescent(), 16);
    }

    #[test]
    fn virtual_clock_advances_to_deadlines() {
        let mut rt = test_runtime();
        let cx = rt.cx();
        let [a, _b] = crate::chan::make(&cx).expect("make");

        rt.spawn(move |cx| async move {
            let deadline = cx.deadline_after(std::time::Duration::from_millis(10));
            let _ = crate::chan::recv(&cx, a, 1, deadline).await;
        });
        rt.run_until_quiescent();

        assert_eq!(rt.now(), Time::from_millis(10));
    }

    #[test]
    fn cancel_wakes_a_parked_task() {
        let mut rt = test_runtime();
        let cx = rt.cx();
        let [a, _b] = crate::chan::make(&cx).expect("make");

        let task = rt.spawn(move |cx| async move {
            let res = crate::chan::recv(&cx, a, 1, crate::time::Deadline::Never).await;
            assert!(res.unwrap_err().is_cancelled());
        });
        rt.run_until_quiescent();
        assert!(!rt.is_finished(task));

        rt.cancel(task);
        rt.run_until_quiescent();
        assert!(rt.is_finished(task));
    }

    #[test]
    fn root_context_reads_the_clock() {
        let rt = test_runtime();
        rt.advance_time(1_000);
        assert_eq!(rt.cx().now(), Time::from_nanos(1_000));
        assert_eq!(rt.now(), Time::from_nanos(1_000));
    }
}
