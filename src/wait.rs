//! The waiter/trigger protocol between parked operations and their resolvers.
//!
//! Every blocking channel operation owns one [`WaitCell`] for the duration
//! of its wait. The parties that can resolve the wait — a rendezvousing
//! peer, the timer heap, a poisoning `done`, a destroying `close` — hold
//! clones of the cell and race to [`fire`](WaitCell::fire) it. The first
//! firing wins and wakes the parked task; later firings are rejected, which
//! is how rendezvous scans recognise waiters that are already spoken for.
//!
//! A multi-way wait registers several waiters against one cell, each with a
//! distinct tag; the firing carries the tag of the clause that resolved it.

use crate::error::ErrorKind;
use std::sync::{Arc, Mutex, Weak};
use std::task::Waker;

/// The resolution delivered to a parked operation.
#[derive(Debug)]
pub(crate) struct Firing {
    /// Caller-chosen identifier of the clause that fired.
    pub(crate) tag: usize,
    /// Outcome of the wait.
    pub(crate) status: Result<(), ErrorKind>,
    /// Message moved across the rendezvous: the delivered bytes for a
    /// resolved receiver, the returned bytes for a sender that failed.
    pub(crate) payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    /// Set by the first successful `fire` and never cleared.
    spent: bool,
    firing: Option<Firing>,
    waker: Option<Waker>,
    /// Messages recovered from this wait's sender clauses by a third party
    /// (queue drain during teardown), keyed by clause tag.
    reclaimed: Vec<(usize, Vec<u8>)>,
}

/// Shared completion slot for one parked operation.
#[derive(Debug, Clone)]
pub(crate) struct WaitCell {
    state: Arc<Mutex<State>>,
}

impl WaitCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Attempts to resolve the wait.
    ///
    /// Returns false if the cell already fired; the caller's status is then
    /// discarded and the associated waiter should be treated as gone.
    pub(crate) fn fire(
        &self,
        tag: usize,
        status: Result<(), ErrorKind>,
        payload: Option<Vec<u8>>,
    ) -> bool {
        let mut state = self.state.lock().expect("wait cell poisoned");
        if state.spent {
            return false;
        }
        state.spent = true;
        state.firing = Some(Firing {
            tag,
            status,
            payload,
        });
        let waker = state.waker.take();
        drop(state);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Returns true if the cell has already fired.
    pub(crate) fn is_spent(&self) -> bool {
        self.state.lock().expect("wait cell poisoned").spent
    }

    /// Takes the firing. The cell remains spent.
    pub(crate) fn take_firing(&self) -> Option<Firing> {
        self.state.lock().expect("wait cell poisoned").firing.take()
    }

    /// Records the waker to notify on the next firing.
    pub(crate) fn register_waker(&self, waker: &Waker) {
        let mut state = self.state.lock().expect("wait cell poisoned");
        match &state.waker {
            Some(existing) if existing.will_wake(waker) => {}
            _ => state.waker = Some(waker.clone()),
        }
    }

    /// Hands a sender clause's message back to the wait's owner.
    ///
    /// Used by teardown paths that unlink a waiter whose cell already fired:
    /// the message cannot ride in a firing, so it is parked here for the
    /// owner to collect at wait exit.
    pub(crate) fn reclaim(&self, tag: usize, msg: Vec<u8>) {
        self.state
            .lock()
            .expect("wait cell poisoned")
            .reclaimed
            .push((tag, msg));
    }

    /// Collects messages recovered on behalf of this wait.
    pub(crate) fn take_reclaimed(&self) -> Vec<(usize, Vec<u8>)> {
        std::mem::take(&mut self.state.lock().expect("wait cell poisoned").reclaimed)
    }

    /// Returns true if both handles belong to the same wait.
    pub(crate) fn same_wait(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn downgrade(&self) -> WeakWaitCell {
        WeakWaitCell {
            state: Arc::downgrade(&self.state),
        }
    }
}

/// Weak reference to a wait cell, held by armed timers.
#[derive(Debug)]
pub(crate) struct WeakWaitCell {
    state: Weak<Mutex<State>>,
}

impl WeakWaitCell {
    pub(crate) fn upgrade(&self) -> Option<WaitCell> {
        self.state.upgrade().map(|state| WaitCell { state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_firing_wins() {
        let cell = WaitCell::new();
        assert!(cell.fire(0, Ok(()), None));
        assert!(!cell.fire(1, Err(ErrorKind::TimedOut), None));

        let firing = cell.take_firing().expect("cell fired");
        assert_eq!(firing.tag, 0);
        assert_eq!(firing.status, Ok(()));
    }

    #[test]
    fn cell_stays_spent_after_take() {
        let cell = WaitCell::new();
        cell.fire(2, Err(ErrorKind::BrokenPipe), None);
        let _ = cell.take_firing();

        assert!(cell.is_spent());
        assert!(!cell.fire(0, Ok(()), None));
    }

    #[test]
    fn firing_wakes_registered_waker() {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));

        let cell = WaitCell::new();
        cell.register_waker(&waker);
        cell.fire(0, Ok(()), Some(b"hi".to_vec()));

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_rides_in_the_firing() {
        let cell = WaitCell::new();
        cell.fire(0, Ok(()), Some(vec![1, 2, 3]));
        let firing = cell.take_firing().expect("cell fired");
        assert_eq!(firing.payload.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn reclaimed_messages_are_collected_once() {
        let cell = WaitCell::new();
        cell.reclaim(3, b"abc".to_vec());
        cell.reclaim(5, b"de".to_vec());

        let got = cell.take_reclaimed();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], (3, b"abc".to_vec()));
        assert!(cell.take_reclaimed().is_empty());
    }

    #[test]
    fn weak_reference_dies_with_the_cell() {
        let cell = WaitCell::new();
        let weak = cell.downgrade();
        assert!(weak.upgrade().is_some());

        drop(cell);
        assert!(weak.upgrade().is_none());
    }
}
