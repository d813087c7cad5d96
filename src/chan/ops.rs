//! Single-shot send and receive.
//!
//! Both operations share one shape: refuse if the task is cancelled,
//! resolve the handle, fail fast on a poisoned direction, try the
//! rendezvous against the head of the opposing queue, and only then consult
//! the deadline; an immediate deadline still completes when a peer is
//! already waiting. With no peer and a non-immediate deadline the operation
//! parks a waiter, arms the timer, and suspends; dropping the suspended
//! future unlinks the waiter, which is what makes cancellation safe.

use super::{resolve, ClauseRef, Dir, RecvWaiter, SendError, SendWaiter};
use crate::cx::Cx;
use crate::error::{Error, ErrorKind};
use crate::handle::Handle;
use crate::time::Deadline;
use crate::wait::WaitCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::trace;

/// Tag of the channel clause within a single-shot wait.
const OP_TAG: usize = 0;
/// Tag of the deadline timer within a single-shot wait.
const TIMER_TAG: usize = 1;

/// Sends `msg` through the half behind `handle`, delivering to its peer.
///
/// Resolves once a receiver takes the message, the deadline elapses, the
/// direction is poisoned, or the task is cancelled. On failure the message
/// comes back inside the [`SendError`].
pub fn send(cx: &Cx, handle: Handle, msg: Vec<u8>, deadline: Deadline) -> SendOp {
    SendOp {
        cx: cx.clone(),
        handle,
        deadline,
        state: SendState::Start { msg },
    }
}

/// Receives a message of length `len` from the half behind `handle`.
///
/// Resolves once a sender hands over a message, the deadline elapses, the
/// direction is poisoned, or the task is cancelled. A sender offering a
/// different length fails both sides with `SizeMismatch`.
pub fn recv(cx: &Cx, handle: Handle, len: usize, deadline: Deadline) -> RecvOp {
    RecvOp {
        cx: cx.clone(),
        handle,
        expected: len,
        deadline,
        state: RecvState::Start,
    }
}

#[derive(Debug)]
enum SendState {
    Start { msg: Vec<u8> },
    Parked { cell: WaitCell, clause: ClauseRef },
    Done,
}

/// Future returned by [`send`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct SendOp {
    cx: Cx,
    handle: Handle,
    deadline: Deadline,
    state: SendState,
}

impl SendOp {
    fn first_poll(
        &mut self,
        msg: Vec<u8>,
        task_cx: &mut Context<'_>,
    ) -> Poll<Result<(), SendError>> {
        if let Err(err) = self.cx.checkpoint() {
            return Poll::Ready(Err(SendError::new(msg, err)));
        }
        let half = match resolve(&self.cx, self.handle) {
            Ok(half) => half,
            Err(err) => return Poll::Ready(Err(SendError::new(msg, err))),
        };
        let target = half.peer_index();
        let mut st = half.pair.lock();
        if st.halves[target].done {
            return Poll::Ready(Err(SendError::new(msg, ErrorKind::BrokenPipe)));
        }
        let receiver = st.halves[target]
            .first_live_receiver()
            .and_then(|key| st.halves[target].inq.remove(key));
        if let Some(receiver) = receiver {
            if receiver.expected != msg.len() {
                receiver
                    .cell
                    .fire(receiver.tag, Err(ErrorKind::SizeMismatch), None);
                return Poll::Ready(Err(SendError::new(msg, ErrorKind::SizeMismatch)));
            }
            trace!(handle = %self.handle, len = msg.len(), "send rendezvous");
            receiver.cell.fire(receiver.tag, Ok(()), Some(msg));
            st.debug_check();
            return Poll::Ready(Ok(()));
        }
        if self.deadline.is_immediate() {
            return Poll::Ready(Err(SendError::new(msg, ErrorKind::TimedOut)));
        }

        let cell = WaitCell::new();
        let serial = st.serial();
        let len = msg.len();
        let key = st.halves[target].outq.push_back(SendWaiter {
            cell: cell.clone(),
            tag: OP_TAG,
            msg,
            serial,
        });
        st.debug_check();
        drop(st);

        if let Some(at) = self.deadline.time() {
            self.cx.arm_timer(at, &cell, TIMER_TAG);
        }
        cell.register_waker(task_cx.waker());
        trace!(handle = %self.handle, len, "sender parked");
        self.state = SendState::Parked {
            cell,
            clause: ClauseRef {
                pair: half.pair,
                half: target,
                dir: Dir::Out,
                key,
                serial,
            },
        };
        Poll::Pending
    }

    fn parked_poll(
        &mut self,
        cell: WaitCell,
        clause: ClauseRef,
        task_cx: &mut Context<'_>,
    ) -> Poll<Result<(), SendError>> {
        if let Some(firing) = cell.take_firing() {
            return Poll::Ready(match firing.status {
                Ok(()) => Ok(()),
                Err(kind) => {
                    let msg = clause
                        .unlink()
                        .or(firing.payload)
                        .or_else(|| reclaimed_msg(&cell))
                        .unwrap_or_default();
                    Err(SendError::new(msg, kind))
                }
            });
        }
        if self.cx.cancel_requested() {
            let msg = clause
                .unlink()
                .or_else(|| reclaimed_msg(&cell))
                .unwrap_or_default();
            return Poll::Ready(Err(SendError::new(msg, ErrorKind::Cancelled)));
        }
        cell.register_waker(task_cx.waker());
        self.state = SendState::Parked { cell, clause };
        Poll::Pending
    }
}

impl Future for SendOp {
    type Output = Result<(), SendError>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, SendState::Done) {
            SendState::Start { msg } => this.first_poll(msg, task_cx),
            SendState::Parked { cell, clause } => this.parked_poll(cell, clause, task_cx),
            SendState::Done => panic!("send polled after completion"),
        }
    }
}

impl Drop for SendOp {
    fn drop(&mut self) {
        if let SendState::Parked { clause, .. } =
            std::mem::replace(&mut self.state, SendState::Done)
        {
            let _ = clause.unlink();
        }
    }
}

#[derive(Debug)]
enum RecvState {
    Start,
    Parked { cell: WaitCell, clause: ClauseRef },
    Done,
}

/// Future returned by [`recv`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct RecvOp {
    cx: Cx,
    handle: Handle,
    expected: usize,
    deadline: Deadline,
    state: RecvState,
}

impl RecvOp {
    fn first_poll(&mut self, task_cx: &mut Context<'_>) -> Poll<Result<Vec<u8>, Error>> {
        self.cx.checkpoint()?;
        let half = resolve(&self.cx, self.handle)?;
        let index = half.index;
        let mut st = half.pair.lock();
        if st.halves[index].done {
            return Poll::Ready(Err(Error::new(ErrorKind::BrokenPipe)));
        }
        let sender = st.halves[index]
            .first_live_sender()
            .and_then(|key| st.halves[index].outq.remove(key));
        if let Some(sender) = sender {
            if sender.msg.len() != self.expected {
                let tag = sender.tag;
                sender.cell.fire(tag, Err(ErrorKind::SizeMismatch), Some(sender.msg));
                return Poll::Ready(Err(Error::new(ErrorKind::SizeMismatch)));
            }
            trace!(handle = %self.handle, len = sender.msg.len(), "recv rendezvous");
            sender.cell.fire(sender.tag, Ok(()), None);
            st.debug_check();
            return Poll::Ready(Ok(sender.msg));
        }
        if self.deadline.is_immediate() {
            return Poll::Ready(Err(Error::new(ErrorKind::TimedOut)));
        }

        let cell = WaitCell::new();
        let serial = st.serial();
        let key = st.halves[index].inq.push_back(RecvWaiter {
            cell: cell.clone(),
            tag: OP_TAG,
            expected: self.expected,
            serial,
        });
        st.debug_check();
        drop(st);

        if let Some(at) = self.deadline.time() {
            self.cx.arm_timer(at, &cell, TIMER_TAG);
        }
        cell.register_waker(task_cx.waker());
        trace!(handle = %self.handle, len = self.expected, "receiver parked");
        self.state = RecvState::Parked {
            cell,
            clause: ClauseRef {
                pair: half.pair,
                half: index,
                dir: Dir::In,
                key,
                serial,
            },
        };
        Poll::Pending
    }

    fn parked_poll(
        &mut self,
        cell: WaitCell,
        clause: ClauseRef,
        task_cx: &mut Context<'_>,
    ) -> Poll<Result<Vec<u8>, Error>> {
        if let Some(firing) = cell.take_firing() {
            let _ = clause.unlink();
            return Poll::Ready(match firing.status {
                Ok(()) => Ok(firing.payload.unwrap_or_default()),
                Err(kind) => Err(Error::new(kind)),
            });
        }
        if self.cx.cancel_requested() {
            let _ = clause.unlink();
            return Poll::Ready(Err(Error::new(ErrorKind::Cancelled)));
        }
        cell.register_waker(task_cx.waker());
        self.state = RecvState::Parked { cell, clause };
        Poll::Pending
    }
}

impl Future for RecvOp {
    type Output = Result<Vec<u8>, Error>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, RecvState::Done) {
            RecvState::Start => this.first_poll(task_cx),
            RecvState::Parked { cell, clause } => this.parked_poll(cell, clause, task_cx),
            RecvState::Done => panic!("recv polled after completion"),
        }
    }
}

impl Drop for RecvOp {
    fn drop(&mut self) {
        if let RecvState::Parked { clause, .. } =
            std::mem::replace(&mut self.state, RecvState::Done)
        {
            let _ = clause.unlink();
        }
    }
}

fn reclaimed_msg(cell: &WaitCell) -> Option<Vec<u8>> {
    cell.take_reclaimed().into_iter().map(|(_, msg)| msg).next()
}
