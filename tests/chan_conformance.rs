//! End-to-end conformance tests for the rendezvous channel protocol.
//!
//! Everything runs on a virtual-clock runtime so timeout scenarios are
//! deterministic: the loop advances time to the next armed deadline instead
//! of sleeping.

use rendez::chan::{self, Clause};
use rendez::test_utils::test_runtime;
use rendez::time::{Deadline, Time};
use rendez::{Choice, Error, ErrorKind, Handle, SendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Slot<T> = Arc<Mutex<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn put<T>(slot: &Slot<T>, value: T) {
    *slot.lock().expect("slot poisoned") = Some(value);
}

fn take<T>(slot: &Slot<T>) -> T {
    slot.lock()
        .expect("slot poisoned")
        .take()
        .expect("task did not resolve")
}

fn queues_empty(cx: &rendez::Cx, handles: &[Handle]) -> bool {
    handles.iter().all(|&h| {
        let st = chan::stats(cx, h).expect("stats");
        st.senders_waiting == 0 && st.receivers_waiting == 0
    })
}

#[test]
fn immediate_rendezvous_delivers_bytes() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let sent: Slot<Result<(), SendError>> = slot();
    let got: Slot<Result<Vec<u8>, Error>> = slot();

    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, b"hi".to_vec(), Deadline::Never).await);
    });
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p1, 2, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    assert!(take(&sent).is_ok());
    assert_eq!(take(&got).expect("recv"), b"hi");
    assert!(queues_empty(&cx, &[p0, p1]));
}

#[test]
fn zero_deadline_send_fails_without_side_effects() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let sent: Slot<Result<(), SendError>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, b"x".to_vec(), Deadline::Immediate).await);
    });
    rt.run_until_quiescent();

    let err = take(&sent).unwrap_err();
    assert_eq!(err.cause.kind(), ErrorKind::TimedOut);
    assert_eq!(err.msg, b"x");
    assert!(queues_empty(&cx, &[p0, p1]));
}

#[test]
fn size_mismatch_fails_both_and_transfers_nothing() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let sent: Slot<Result<(), SendError>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, b"ab".to_vec(), Deadline::Never).await);
    });
    rt.run_until_quiescent();

    let got: Slot<Result<Vec<u8>, Error>> = slot();
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p1, 3, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    let send_err = take(&sent).unwrap_err();
    assert_eq!(send_err.cause.kind(), ErrorKind::SizeMismatch);
    // The message comes back to the sender untouched.
    assert_eq!(send_err.msg, b"ab");

    assert_eq!(take(&got).unwrap_err().kind(), ErrorKind::SizeMismatch);
    assert!(queues_empty(&cx, &[p0, p1]));
}

#[test]
fn done_poisons_one_direction_only() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    cx.done(p0).expect("done");

    // Sending through the poisoned direction fails.
    let sent: Slot<Result<(), SendError>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, b"x".to_vec(), Deadline::Never).await);
    });
    // Receiving on the poisoned half fails even non-blocking.
    let got: Slot<Result<Vec<u8>, Error>> = slot();
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p1, 1, Deadline::Immediate).await);
    });
    rt.run_until_quiescent();

    assert_eq!(take(&sent).unwrap_err().cause.kind(), ErrorKind::BrokenPipe);
    assert_eq!(take(&got).unwrap_err().kind(), ErrorKind::BrokenPipe);

    // The opposite direction still rendezvouses.
    let sent: Slot<Result<(), SendError>> = slot();
    let got: Slot<Result<Vec<u8>, Error>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p1, b"y".to_vec(), Deadline::Never).await);
    });
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p0, 1, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    assert!(take(&sent).is_ok());
    assert_eq!(take(&got).expect("recv"), b"y");
}

#[test]
fn choose_takes_the_first_ready_clause() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [c1s, c1r] = chan::make(&cx).expect("make c1");
    let [c2s, c2r] = chan::make(&cx).expect("make c2");

    let z_sent: Slot<Result<(), SendError>> = slot();
    let out = Arc::clone(&z_sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, c1s, b"1".to_vec(), Deadline::Never).await);
    });
    let y = rt.spawn(move |cx| async move {
        let _ = chan::send(&cx, c2s, b"2".to_vec(), Deadline::Never).await;
    });
    rt.run_until_quiescent();

    let chosen: Slot<(Result<Choice, Error>, Option<Vec<u8>>)> = slot();
    let out = Arc::clone(&chosen);
    rt.spawn(move |cx| async move {
        let mut clauses = [Clause::recv(c1r, 1), Clause::recv(c2r, 1)];
        let res = chan::choose(&cx, &mut clauses, Deadline::Never).await;
        let msg = clauses[0].take_message();
        put(&out, (res, msg));
    });
    rt.run_until_quiescent();

    let (res, msg) = take(&chosen);
    let choice = res.expect("choice");
    assert_eq!(choice.index, 0);
    assert!(choice.result.is_ok());
    assert_eq!(msg.expect("message"), b"1");

    // Z resumed with success; Y is still parked.
    assert!(take(&z_sent).is_ok());
    assert!(!rt.is_finished(y));
    assert_eq!(chan::stats(&cx, c2r).expect("stats").senders_waiting, 1);
}

#[test]
fn choose_times_out_after_its_deadline() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let chosen: Slot<Result<Choice, Error>> = slot();
    let out = Arc::clone(&chosen);
    rt.spawn(move |cx| async move {
        let deadline = cx.deadline_after(Duration::from_millis(10));
        let mut clauses = [Clause::send(p0, b"a".to_vec()), Clause::recv(p1, 1)];
        put(&out, chan::choose(&cx, &mut clauses, deadline).await);
    });
    rt.run_until_quiescent();

    assert_eq!(take(&chosen).unwrap_err().kind(), ErrorKind::TimedOut);
    assert_eq!(rt.now(), Time::from_millis(10));
    assert!(queues_empty(&cx, &[p0, p1]));
}

#[test]
fn closing_both_halves_wakes_parked_receiver() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let got: Slot<Result<Vec<u8>, Error>> = slot();
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p1, 1, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    cx.close(p0).expect("close p0");
    // One half closed: the receiver stays parked.
    assert!(got.lock().expect("slot poisoned").is_none());

    cx.close(p1).expect("close p1");
    rt.run_until_quiescent();

    assert_eq!(take(&got).unwrap_err().kind(), ErrorKind::BrokenPipe);
    assert_eq!(cx.handle_count(), 0);
}

#[test]
fn waiters_pair_in_fifo_order() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    for i in 0..3u8 {
        rt.spawn(move |cx| async move {
            let _ = chan::send(&cx, p0, vec![i], Deadline::Never).await;
        });
    }
    rt.run_until_quiescent();
    assert_eq!(chan::stats(&cx, p1).expect("stats").senders_waiting, 3);

    let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let order = Arc::clone(&order);
        rt.spawn(move |cx| async move {
            let msg = chan::recv(&cx, p1, 1, Deadline::Never).await.expect("recv");
            order.lock().expect("order poisoned").push(msg[0]);
        });
    }
    rt.run_until_quiescent();

    assert_eq!(*order.lock().expect("order poisoned"), vec![0, 1, 2]);
    assert!(queues_empty(&cx, &[p0, p1]));
}

#[test]
fn done_is_observably_monotonic() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    cx.done(p0).expect("done");
    assert_eq!(cx.done(p0).unwrap_err().kind(), ErrorKind::BrokenPipe);

    // Repeated operations keep failing the same way.
    for _ in 0..2 {
        let sent: Slot<Result<(), SendError>> = slot();
        let out = Arc::clone(&sent);
        rt.spawn(move |cx| async move {
            put(&out, chan::send(&cx, p0, b"n".to_vec(), Deadline::Immediate).await);
        });
        rt.run_until_quiescent();
        assert_eq!(take(&sent).unwrap_err().cause.kind(), ErrorKind::BrokenPipe);
    }
}

#[test]
fn storage_reuse_survives_either_close_order() {
    let rt = test_runtime();
    let cx = rt.cx();
    let storage = chan::ChanStorage::new();

    for close_first in [0usize, 1] {
        let handles = chan::make_in_place(&cx, &storage).expect("wire");
        assert!(storage.is_in_use());

        cx.close(handles[close_first]).expect("first close");
        assert!(storage.is_in_use());
        cx.close(handles[1 - close_first]).expect("second close");
        assert!(!storage.is_in_use());
    }
}

#[test]
fn parked_sender_survives_single_close_of_peerless_half() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let sent: Slot<Result<(), SendError>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, b"k".to_vec(), Deadline::Never).await);
    });
    rt.run_until_quiescent();

    // Closing the sender's own handle does not wake the parked clause; the
    // peer may still receive.
    cx.close(p0).expect("close p0");
    assert!(sent.lock().expect("slot poisoned").is_none());

    let got: Slot<Result<Vec<u8>, Error>> = slot();
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p1, 1, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    assert!(take(&sent).is_ok());
    assert_eq!(take(&got).expect("recv"), b"k");
    cx.close(p1).expect("close p1");
}

#[test]
fn cancelling_a_parked_choose_unlinks_every_clause() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [a0, a1] = chan::make(&cx).expect("make a");
    let [_b0, b1] = chan::make(&cx).expect("make b");

    let chosen: Slot<(Result<Choice, Error>, Option<Vec<u8>>)> = slot();
    let out = Arc::clone(&chosen);
    let task = rt.spawn(move |cx| async move {
        let mut clauses = [Clause::send(a0, b"m".to_vec()), Clause::recv(b1, 1)];
        let res = chan::choose(&cx, &mut clauses, Deadline::Never).await;
        put(&out, (res, clauses[0].take_message()));
    });
    rt.run_until_quiescent();
    assert_eq!(chan::stats(&cx, a1).expect("stats").senders_waiting, 1);
    assert_eq!(chan::stats(&cx, b1).expect("stats").receivers_waiting, 1);

    rt.cancel(task);
    rt.run_until_quiescent();

    let (res, msg) = take(&chosen);
    assert_eq!(res.unwrap_err().kind(), ErrorKind::Cancelled);
    // The undelivered message is restored to its clause.
    assert_eq!(msg.expect("message"), b"m");
    assert!(queues_empty(&cx, &[a0, a1, b1]));
}

#[test]
fn zero_length_messages_rendezvous() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    let sent: Slot<Result<(), SendError>> = slot();
    let got: Slot<Result<Vec<u8>, Error>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, Vec::new(), Deadline::Never).await);
    });
    let out = Arc::clone(&got);
    rt.spawn(move |cx| async move {
        put(&out, chan::recv(&cx, p1, 0, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    assert!(take(&sent).is_ok());
    assert!(take(&got).expect("recv").is_empty());
}

#[test]
fn waiter_queues_never_hold_both_directions() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");

    // Senders first, receivers after; each rendezvous pops one sender.
    for _ in 0..2 {
        rt.spawn(move |cx| async move {
            let _ = chan::send(&cx, p0, b"q".to_vec(), Deadline::Never).await;
        });
    }
    rt.spawn(move |cx| async move {
        let _ = chan::recv(&cx, p1, 1, Deadline::Never).await;
    });
    rt.run_until_quiescent();

    let st = chan::stats(&cx, p1).expect("stats");
    assert_eq!(st.senders_waiting, 1);
    assert_eq!(st.receivers_waiting, 0);

    // A third receiver drains the last sender; a fourth parks.
    rt.spawn(move |cx| async move {
        let _ = chan::recv(&cx, p1, 1, Deadline::Never).await;
    });
    rt.spawn(move |cx| async move {
        let _ = chan::recv(&cx, p1, 1, Deadline::Never).await;
    });
    rt.run_until_quiescent();

    let st = chan::stats(&cx, p1).expect("stats");
    assert_eq!(st.senders_waiting, 0);
    assert_eq!(st.receivers_waiting, 1);
}

#[test]
fn stale_handles_are_rejected_everywhere() {
    let mut rt = test_runtime();
    let cx = rt.cx();
    let [p0, p1] = chan::make(&cx).expect("make");
    cx.close(p0).expect("close");

    let sent: Slot<Result<(), SendError>> = slot();
    let out = Arc::clone(&sent);
    rt.spawn(move |cx| async move {
        put(&out, chan::send(&cx, p0, b"x".to_vec(), Deadline::Never).await);
    });
    rt.run_until_quiescent();
    assert_eq!(take(&sent).unwrap_err().cause.kind(), ErrorKind::BadHandle);

    // A choose clause naming the dead handle resolves at that index.
    let chosen: Slot<Result<Choice, Error>> = slot();
    let out = Arc::clone(&chosen);
    rt.spawn(move |cx| async move {
        let mut clauses = [Clause::recv(p1, 1), Clause::recv(p0, 1)];
        put(&out, chan::choose(&cx, &mut clauses, Deadline::Never).await);
    });
    rt.run_until_quiescent();

    let choice = take(&chosen).expect("choice");
    assert_eq!(choice.index, 1);
    assert_eq!(choice.result.unwrap_err().kind(), ErrorKind::BadHandle);
}
