//! Rendez: synchronous rendezvous channels on a deterministic cooperative
//! runtime.
//!
//! A channel here holds nothing. Sender and receiver meet in one atomic
//! handoff: whichever arrives first parks until the other shows up, and
//! the message moves directly between their records. On top of that single
//! primitive the crate layers per-operation deadlines, one-shot direction
//! poisoning (`done`), two-step pair destruction (`close`), and a multi-way
//! wait (`choose`) that can park on any number of channels at once and
//! cleanly withdraw from the rest when one fires.
//!
//! # Core Guarantees
//!
//! - **No buffering**: a rendezvous transfers ownership of the message in
//!   one step; the runtime never holds a copy
//! - **FIFO fairness**: waiters rendezvous in arrival order, and `choose`
//!   participants queue like any other waiter
//! - **Cancel-correctness**: every parked clause is unlinked when its wait
//!   exits, no matter which event (peer, timer, poison, cancellation)
//!   resolved it
//! - **Deterministic testing**: a virtual-clock runtime advances time to
//!   armed deadlines, so timeout paths replay identically
//!
//! # Module Structure
//!
//! - [`runtime`]: the single-threaded executor, its clock and configuration
//! - [`cx`]: per-task capability context and cancellation probe
//! - [`chan`]: channel pairs, send/recv, choose, lifecycle
//! - [`handle`]: generational handle table
//! - [`time`]: instants, deadlines, wall and virtual clocks
//! - [`error`]: the error taxonomy
//!
//! # Example
//!
//! ```
//! use rendez::chan;
//! use rendez::time::Deadline;
//! use rendez::runtime::Runtime;
//!
//! let mut rt = Runtime::builder().virtual_time().build();
//! let cx = rt.cx();
//! let [tx, rx] = chan::make(&cx).unwrap();
//!
//! rt.spawn(move |cx| async move {
//!     chan::send(&cx, tx, b"ping".to_vec(), Deadline::Never)
//!         .await
//!         .unwrap();
//! });
//! rt.spawn(move |cx| async move {
//!     let msg = chan::recv(&cx, rx, 4, Deadline::Never).await.unwrap();
//!     assert_eq!(msg, b"ping");
//! });
//! rt.run_until_quiescent();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod chan;
pub mod cx;
pub mod error;
pub mod handle;
pub mod runtime;
pub mod test_utils;
pub mod time;

mod list;
mod wait;

pub use chan::{
    choose, make, make_in_place, recv, send, stats, ChanOp, ChanStats, ChanStorage, Choice,
    ChooseOp, Clause, RecvOp, SendError, SendOp,
};
pub use cx::{Cx, TaskId};
pub use error::{Error, ErrorKind};
pub use handle::Handle;
pub use runtime::{ClockMode, ConfigError, Runtime, RuntimeConfig};
pub use time::{Deadline, Time};
