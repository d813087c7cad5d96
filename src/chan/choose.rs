//! Multi-way wait over several channel clauses.
//!
//! `choose` scans its clauses in input order and resolves at the first one
//! that can rendezvous immediately; an earlier ready clause always beats a
//! later one. When none is ready it registers one waiter per clause (each
//! tagged with its input index) on the appropriate queue, arms a timer
//! tagged one past the last clause, and parks. Whichever waiter fires first
//! decides the outcome; every other registration is unlinked when the wait
//! exits, whether by resumption or by dropping the future, and unfired send
//! clauses get their messages back.

use super::{resolve, ChanHalf, ClauseRef, Dir, RecvWaiter, SendWaiter};
use crate::cx::Cx;
use crate::error::{Error, ErrorKind};
use crate::handle::Handle;
use crate::time::Deadline;
use crate::wait::WaitCell;
use smallvec::SmallVec;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

/// The direction of a choose clause.
///
/// The discriminants are stable and part of the wire-level contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanOp {
    /// Offer a message to the peer of the clause's half.
    Send = 0,
    /// Take a message arriving at the clause's half.
    Recv = 1,
}

/// One alternative of a multi-way wait.
#[derive(Debug)]
pub struct Clause {
    handle: Handle,
    op: ChanOp,
    msg: Option<Vec<u8>>,
    len: usize,
}

impl Clause {
    /// Builds a send clause offering `msg`.
    #[must_use]
    pub fn send(handle: Handle, msg: Vec<u8>) -> Self {
        Self {
            handle,
            op: ChanOp::Send,
            len: msg.len(),
            msg: Some(msg),
        }
    }

    /// Builds a receive clause expecting a message of length `len`.
    #[must_use]
    pub const fn recv(handle: Handle, len: usize) -> Self {
        Self {
            handle,
            op: ChanOp::Recv,
            msg: None,
            len,
        }
    }

    /// The handle this clause operates on.
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.handle
    }

    /// The clause direction.
    #[must_use]
    pub const fn op(&self) -> ChanOp {
        self.op
    }

    /// The payload length this clause offers or expects.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Takes the clause's message: the received bytes after a fired receive
    /// clause, or the returned bytes of a send clause that did not fire.
    pub fn take_message(&mut self) -> Option<Vec<u8>> {
        self.msg.take()
    }
}

/// Outcome of a resolved `choose`: which clause fired and how.
#[derive(Debug)]
pub struct Choice {
    /// Input index of the resolving clause.
    pub index: usize,
    /// The clause's own outcome.
    pub result: Result<(), Error>,
}

/// Waits until any one of `clauses` can complete, resolving to its index.
///
/// A global failure (cancellation, an elapsed deadline, or an empty wait)
/// surfaces as `Err`; a per-clause failure (poisoned direction, bad handle,
/// size mismatch) resolves the choose at that clause's index with the error
/// in [`Choice::result`].
pub fn choose<'a>(cx: &Cx, clauses: &'a mut [Clause], deadline: Deadline) -> ChooseOp<'a> {
    ChooseOp {
        cx: cx.clone(),
        clauses,
        deadline,
        state: ChooseState::Start,
    }
}

#[derive(Debug)]
enum ChooseState {
    Start,
    Parked {
        cell: WaitCell,
        registered: SmallVec<[ClauseRef; 4]>,
    },
    Done,
}

/// Future returned by [`choose`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct ChooseOp<'a> {
    cx: Cx,
    clauses: &'a mut [Clause],
    deadline: Deadline,
    state: ChooseState,
}

impl ChooseOp<'_> {
    /// Scans for an immediately satisfiable clause, in input order.
    fn scan(&mut self, halves: &mut SmallVec<[ChanHalf; 4]>) -> Option<Choice> {
        for i in 0..self.clauses.len() {
            let half = match resolve(&self.cx, self.clauses[i].handle) {
                Ok(half) => half,
                Err(err) => {
                    return Some(Choice {
                        index: i,
                        result: Err(err),
                    })
                }
            };
            match self.clauses[i].op {
                ChanOp::Send => {
                    if self.clauses[i].msg.is_none() {
                        return Some(Choice {
                            index: i,
                            result: Err(Error::new(ErrorKind::InvalidArgument)
                                .with_context("send clause without a message")),
                        });
                    }
                    let target = half.peer_index();
                    let mut st = half.pair.lock();
                    if st.halves[target].done {
                        return Some(Choice {
                            index: i,
                            result: Err(Error::new(ErrorKind::BrokenPipe)),
                        });
                    }
                    let receiver = st.halves[target]
                        .first_live_receiver()
                        .and_then(|key| st.halves[target].inq.remove(key));
                    if let Some(receiver) = receiver {
                        if receiver.expected != self.clauses[i].len {
                            receiver
                                .cell
                                .fire(receiver.tag, Err(ErrorKind::SizeMismatch), None);
                            return Some(Choice {
                                index: i,
                                result: Err(Error::new(ErrorKind::SizeMismatch)),
                            });
                        }
                        let msg = self.clauses[i].msg.take().unwrap_or_default();
                        receiver.cell.fire(receiver.tag, Ok(()), Some(msg));
                        st.debug_check();
                        return Some(Choice {
                            index: i,
                            result: Ok(()),
                        });
                    }
                }
                ChanOp::Recv => {
                    let index = half.index;
                    let mut st = half.pair.lock();
                    if st.halves[index].done {
                        return Some(Choice {
                            index: i,
                            result: Err(Error::new(ErrorKind::BrokenPipe)),
                        });
                    }
                    let sender = st.halves[index]
                        .first_live_sender()
                        .and_then(|key| st.halves[index].outq.remove(key));
                    if let Some(sender) = sender {
                        if sender.msg.len() != self.clauses[i].len {
                            let tag = sender.tag;
                            sender
                                .cell
                                .fire(tag, Err(ErrorKind::SizeMismatch), Some(sender.msg));
                            return Some(Choice {
                                index: i,
                                result: Err(Error::new(ErrorKind::SizeMismatch)),
                            });
                        }
                        sender.cell.fire(sender.tag, Ok(()), None);
                        st.debug_check();
                        self.clauses[i].msg = Some(sender.msg);
                        return Some(Choice {
                            index: i,
                            result: Ok(()),
                        });
                    }
                }
            }
            halves.push(half);
        }
        None
    }

    /// Links one waiter per clause, all against the same wait cell.
    fn register(&mut self, halves: &[ChanHalf], cell: &WaitCell) -> SmallVec<[ClauseRef; 4]> {
        let mut registered = SmallVec::with_capacity(self.clauses.len());
        for (i, half) in halves.iter().enumerate() {
            let clause = &mut self.clauses[i];
            match clause.op {
                ChanOp::Send => {
                    let target = half.peer_index();
                    let mut st = half.pair.lock();
                    let serial = st.serial();
                    let msg = clause.msg.take().unwrap_or_default();
                    let key = st.halves[target].outq.push_back(SendWaiter {
                        cell: cell.clone(),
                        tag: i,
                        msg,
                        serial,
                    });
                    registered.push(ClauseRef {
                        pair: Arc::clone(&half.pair),
                        half: target,
                        dir: Dir::Out,
                        key,
                        serial,
                    });
                }
                ChanOp::Recv => {
                    let mut st = half.pair.lock();
                    let serial = st.serial();
                    let key = st.halves[half.index].inq.push_back(RecvWaiter {
                        cell: cell.clone(),
                        tag: i,
                        expected: clause.len,
                        serial,
                    });
                    registered.push(ClauseRef {
                        pair: Arc::clone(&half.pair),
                        half: half.index,
                        dir: Dir::In,
                        key,
                        serial,
                    });
                }
            }
        }
        registered
    }

    fn first_poll(&mut self, task_cx: &mut Context<'_>) -> Poll<Result<Choice, Error>> {
        self.cx.checkpoint()?;

        let mut halves: SmallVec<[ChanHalf; 4]> = SmallVec::with_capacity(self.clauses.len());
        if let Some(choice) = self.scan(&mut halves) {
            trace!(index = choice.index, "choose resolved on the fast path");
            return Poll::Ready(Ok(choice));
        }
        if self.deadline.is_immediate() {
            return Poll::Ready(Err(Error::new(ErrorKind::TimedOut)));
        }

        let cell = WaitCell::new();
        let registered = self.register(&halves, &cell);
        if let Some(at) = self.deadline.time() {
            self.cx.arm_timer(at, &cell, self.clauses.len());
        }
        cell.register_waker(task_cx.waker());
        trace!(clauses = self.clauses.len(), "choose parked");
        self.state = ChooseState::Parked { cell, registered };
        Poll::Pending
    }

    fn parked_poll(
        &mut self,
        cell: WaitCell,
        registered: SmallVec<[ClauseRef; 4]>,
        task_cx: &mut Context<'_>,
    ) -> Poll<Result<Choice, Error>> {
        if let Some(firing) = cell.take_firing() {
            self.release(&registered, &cell);
            if firing.tag == self.clauses.len() {
                return Poll::Ready(Err(Error::new(ErrorKind::TimedOut)));
            }
            if let Some(payload) = firing.payload {
                self.clauses[firing.tag].msg = Some(payload);
            }
            return Poll::Ready(Ok(Choice {
                index: firing.tag,
                result: firing.status.map_err(Error::new),
            }));
        }
        if self.cx.cancel_requested() {
            self.release(&registered, &cell);
            return Poll::Ready(Err(Error::new(ErrorKind::Cancelled)));
        }
        cell.register_waker(task_cx.waker());
        self.state = ChooseState::Parked { cell, registered };
        Poll::Pending
    }

    /// Unlinks every still-linked registration and hands unsent messages
    /// back to their clauses.
    fn release(&mut self, registered: &[ClauseRef], cell: &WaitCell) {
        for (i, clause) in registered.iter().enumerate() {
            if let Some(msg) = clause.unlink() {
                self.clauses[i].msg = Some(msg);
            }
        }
        for (tag, msg) in cell.take_reclaimed() {
            if tag < self.clauses.len() {
                self.clauses[tag].msg = Some(msg);
            }
        }
    }
}

impl Future for ChooseOp<'_> {
    type Output = Result<Choice, Error>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, ChooseState::Done) {
            ChooseState::Start => this.first_poll(task_cx),
            ChooseState::Parked { cell, registered } => {
                this.parked_poll(cell, registered, task_cx)
            }
            ChooseState::Done => panic!("choose polled after completion"),
        }
    }
}

impl Drop for ChooseOp<'_> {
    fn drop(&mut self) {
        if let ChooseState::Parked { cell, registered } =
            std::mem::replace(&mut self.state, ChooseState::Done)
        {
            self.release(&registered, &cell);
        }
    }
}
