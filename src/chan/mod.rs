//! Rendezvous channel pairs.
//!
//! A channel is a pair of half-channels sharing one state cell. Each half is
//! exposed through its own [`Handle`]; given half `i`, its peer is half
//! `i ^ 1`. Sending through a half delivers into the peer: a sender parks on
//! the peer's outbound queue and matches receivers parked on the peer's
//! inbound queue. There is no buffer anywhere: a rendezvous moves the
//! message straight from the sender's record to the receiver's.
//!
//! Lifecycle: [`make`] heap-allocates a pair, [`make_in_place`] wires
//! caller-owned [`ChanStorage`]. Closing one half only marks it; closing the
//! second drains every parked waiter with `BrokenPipe` and releases (or
//! resets) the storage. `done` poisons a single direction without touching
//! the other.

mod choose;
mod ops;

pub use choose::{choose, ChanOp, Choice, ChooseOp, Clause};
pub use ops::{recv, send, RecvOp, SendOp};

use crate::cx::Cx;
use crate::error::{Error, ErrorKind};
use crate::handle::{Handle, HandleObject};
use crate::list::WaitList;
use crate::wait::WaitCell;
use std::any::Any;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// A receiver parked on a half-channel's inbound queue.
#[derive(Debug)]
pub(crate) struct RecvWaiter {
    pub(crate) cell: WaitCell,
    pub(crate) tag: usize,
    pub(crate) expected: usize,
    pub(crate) serial: u64,
}

/// A sender parked on a half-channel's outbound queue, message in hand.
#[derive(Debug)]
pub(crate) struct SendWaiter {
    pub(crate) cell: WaitCell,
    pub(crate) tag: usize,
    pub(crate) msg: Vec<u8>,
    pub(crate) serial: u64,
}

/// One endpoint's share of the pair state.
#[derive(Debug)]
pub(crate) struct HalfState {
    /// Receivers parked on this half.
    pub(crate) inq: WaitList<RecvWaiter>,
    /// Senders parked to deliver into this half.
    pub(crate) outq: WaitList<SendWaiter>,
    pub(crate) done: bool,
    closed: bool,
    mem: bool,
}

impl HalfState {
    fn new(mem: bool) -> Self {
        Self {
            inq: WaitList::new(),
            outq: WaitList::new(),
            done: false,
            closed: false,
            mem,
        }
    }

    /// Key of the first parked receiver whose wait is still open.
    ///
    /// Waiters whose cell already fired belong to multi-way waits resolved
    /// elsewhere; they are skipped here and unlinked by their owner.
    pub(crate) fn first_live_receiver(&self) -> Option<usize> {
        self.inq
            .iter()
            .find(|(_, w)| !w.cell.is_spent())
            .map(|(key, _)| key)
    }

    /// Key of the first parked sender whose wait is still open.
    pub(crate) fn first_live_sender(&self) -> Option<usize> {
        self.outq
            .iter()
            .find(|(_, w)| !w.cell.is_spent())
            .map(|(key, _)| key)
    }

    fn live_receivers(&self) -> usize {
        self.inq.iter().filter(|(_, w)| !w.cell.is_spent()).count()
    }

    fn live_senders(&self) -> usize {
        self.outq.iter().filter(|(_, w)| !w.cell.is_spent()).count()
    }

    /// Resumes every parked waiter with `BrokenPipe` and empties both
    /// queues. Messages of already-resolved senders are handed back through
    /// their cells.
    fn drain(&mut self) {
        while let Some(w) = self.inq.pop_front() {
            w.cell.fire(w.tag, Err(ErrorKind::BrokenPipe), None);
        }
        while let Some(w) = self.outq.pop_front() {
            if w.cell.is_spent() {
                w.cell.reclaim(w.tag, w.msg);
            } else {
                w.cell.fire(w.tag, Err(ErrorKind::BrokenPipe), Some(w.msg));
            }
        }
    }
}

/// State shared by the two halves of a pair.
#[derive(Debug)]
pub(crate) struct PairShared {
    pub(crate) halves: [HalfState; 2],
    next_serial: u64,
    in_use: bool,
}

impl PairShared {
    fn new(mem: bool) -> Self {
        Self {
            halves: [HalfState::new(mem), HalfState::new(mem)],
            next_serial: 0,
            in_use: false,
        }
    }

    pub(crate) fn serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// A half never holds live waiters of two different waits on both
    /// queues: they would have rendezvoused. A single multi-way wait may
    /// legitimately park on both directions of one half.
    pub(crate) fn debug_check(&self) {
        for half in &self.halves {
            debug_assert!(
                half.inq
                    .iter()
                    .filter(|(_, r)| !r.cell.is_spent())
                    .all(|(_, r)| {
                        half.outq
                            .iter()
                            .filter(|(_, s)| !s.cell.is_spent())
                            .all(|(_, s)| s.cell.same_wait(&r.cell))
                    }),
                "half-channel holds unmatched live waiters in both directions"
            );
        }
    }
}

/// The allocation unit: one mutex over both halves.
#[derive(Debug)]
pub(crate) struct PairCell {
    pub(crate) state: Mutex<PairShared>,
}

impl PairCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(PairShared::new(false)),
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, PairShared> {
        self.state.lock().expect("channel state poisoned")
    }
}

/// One endpoint of a pair; the object behind a channel handle.
#[derive(Debug, Clone)]
pub(crate) struct ChanHalf {
    pub(crate) pair: Arc<PairCell>,
    pub(crate) index: usize,
}

impl ChanHalf {
    pub(crate) fn peer_index(&self) -> usize {
        self.index ^ 1
    }
}

impl HandleObject for ChanHalf {
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Poisons the direction flowing out of this half: subsequent sends
    /// here and receives on the peer fail with `BrokenPipe`. Waiters parked
    /// on the peer in either direction are resumed with `BrokenPipe`.
    fn done(&self) -> Result<(), Error> {
        let mut st = self.pair.lock();
        let peer = self.peer_index();
        if st.halves[peer].done {
            return Err(Error::new(ErrorKind::BrokenPipe).with_context("direction already done"));
        }
        st.halves[peer].done = true;
        st.halves[peer].drain();
        trace!(half = self.index, "channel direction poisoned");
        Ok(())
    }

    /// First close marks the half; the close of the second half performs
    /// destruction: every waiter on both halves resumes with `BrokenPipe`,
    /// and caller-owned storage is reset for reuse. Waiters are never woken
    /// while the peer handle is still open — its owner may legitimately
    /// keep using the channel.
    fn close(self: Box<Self>) {
        let mut st = self.pair.lock();
        st.halves[self.index].closed = true;
        if !st.halves[self.peer_index()].closed {
            trace!(half = self.index, "channel half closed, peer still open");
            return;
        }
        st.halves[0].drain();
        st.halves[1].drain();
        let mem = st.halves[0].mem;
        if mem {
            *st = PairShared::new(true);
        }
        trace!(half = self.index, mem, "channel pair destroyed");
    }
}

/// Caller-owned backing storage for a pair, reusable across generations.
///
/// Wire it with [`make_in_place`]; once both resulting handles are closed
/// the storage resets and can be wired again. The allocation itself is
/// released only when the `ChanStorage` is dropped.
#[derive(Debug)]
pub struct ChanStorage {
    cell: Arc<PairCell>,
}

impl ChanStorage {
    /// Allocates storage for one pair.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Arc::new(PairCell::new()),
        }
    }

    /// Returns true while the storage backs a live pair.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.cell.lock().in_use
    }
}

impl Default for ChanStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic snapshot of one half-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChanStats {
    /// Receivers parked on this half.
    pub receivers_waiting: usize,
    /// Senders parked to deliver into this half.
    pub senders_waiting: usize,
    /// Whether the direction into this half has been poisoned.
    pub done: bool,
}

/// Error returned by a failed send, handing the unsent message back.
#[derive(Debug)]
pub struct SendError {
    /// The message that was not delivered.
    pub msg: Vec<u8>,
    /// Why the send failed.
    pub cause: Error,
}

impl SendError {
    pub(crate) fn new(msg: Vec<u8>, cause: impl Into<Error>) -> Self {
        Self {
            msg,
            cause: cause.into(),
        }
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "send failed: {}", self.cause)
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

fn wire(cx: &Cx, pair: &Arc<PairCell>, mem: bool) -> Result<[Handle; 2], Error> {
    cx.checkpoint()?;
    {
        let mut st = pair.lock();
        if st.in_use {
            return Err(
                Error::new(ErrorKind::InvalidArgument).with_context("storage already wired")
            );
        }
        *st = PairShared::new(mem);
        st.in_use = true;
    }
    let unwire = || pair.lock().in_use = false;

    let mut table = cx.handles();
    let first = match table.insert(Box::new(ChanHalf {
        pair: Arc::clone(pair),
        index: 0,
    })) {
        Ok(handle) => handle,
        Err(err) => {
            drop(table);
            unwire();
            return Err(err);
        }
    };
    let second = match table.insert(Box::new(ChanHalf {
        pair: Arc::clone(pair),
        index: 1,
    })) {
        Ok(handle) => handle,
        Err(err) => {
            // Two handles or none: withdraw the first registration.
            let _ = table.remove(first);
            drop(table);
            unwire();
            return Err(err);
        }
    };
    drop(table);
    trace!(%first, %second, mem, "channel pair wired");
    Ok([first, second])
}

/// Creates a heap-allocated channel pair, returning both handles.
///
/// # Errors
///
/// `Cancelled` if the calling task is being torn down; `OutOfMemory` if the
/// handle table cannot hold two more entries. Either two handles are
/// produced or none.
pub fn make(cx: &Cx) -> Result<[Handle; 2], Error> {
    let pair = Arc::new(PairCell::new());
    wire(cx, &pair, false)
}

/// Wires a channel pair into caller-owned storage, returning both handles.
///
/// The storage is marked in use until both handles are closed, after which
/// it may be wired again.
///
/// # Errors
///
/// `InvalidArgument` if the storage already backs a live pair; otherwise as
/// [`make`].
pub fn make_in_place(cx: &Cx, storage: &ChanStorage) -> Result<[Handle; 2], Error> {
    wire(cx, &storage.cell, true)
}

/// Reports the waiter queues and poison state of the half behind `handle`.
///
/// # Errors
///
/// `BadHandle` or `NotSupported` if the handle does not name a channel.
pub fn stats(cx: &Cx, handle: Handle) -> Result<ChanStats, Error> {
    let half = resolve(cx, handle)?;
    let st = half.pair.lock();
    let hs = &st.halves[half.index];
    Ok(ChanStats {
        receivers_waiting: hs.live_receivers(),
        senders_waiting: hs.live_senders(),
        done: hs.done,
    })
}

/// Resolves a handle to its channel half.
pub(crate) fn resolve(cx: &Cx, handle: Handle) -> Result<ChanHalf, Error> {
    let table = cx.handles();
    let half = table.query::<ChanHalf>(handle)?.clone();
    Ok(half)
}

/// Which queue of a half a parked clause lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dir {
    In,
    Out,
}

/// Location of a parked clause, good for exactly one unlink.
///
/// The serial guards against slab key reuse: if the node was removed by
/// another party and its key recycled, the unlink is a no-op.
#[derive(Debug)]
pub(crate) struct ClauseRef {
    pub(crate) pair: Arc<PairCell>,
    pub(crate) half: usize,
    pub(crate) dir: Dir,
    pub(crate) key: usize,
    pub(crate) serial: u64,
}

impl ClauseRef {
    /// Removes the clause if it is still linked; returns a parked sender's
    /// message so the caller can hand it back.
    pub(crate) fn unlink(&self) -> Option<Vec<u8>> {
        let mut st = self.pair.lock();
        let half = &mut st.halves[self.half];
        match self.dir {
            Dir::In => {
                if half
                    .inq
                    .get(self.key)
                    .is_some_and(|w| w.serial == self.serial)
                {
                    half.inq.remove(self.key);
                }
                None
            }
            Dir::Out => {
                if half
                    .outq
                    .get(self.key)
                    .is_some_and(|w| w.serial == self.serial)
                {
                    half.outq.remove(self.key).map(|w| w.msg)
                } else {
                    None
                }
            }
        }
    }
}
