//! Delivery of decoded events to user-supplied callbacks.
//!
//! Two concerns live here: the per-connection request/response table
//! (matching an incoming message's request id against a pending
//! outgoing request, or falling back to the connection's default
//! handler), and the worker-thread pool that actually runs callbacks
//! -- kept separate from the reactor threads so a slow user callback
//! never starves I/O, per the concurrency model.

use std::collections::HashMap;
use std::num::Wrapping;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use event::Event;

/// A user-supplied callback invoked with `Event`s for a connection
/// that aren't claimed by a pending request -- the "default callback"
/// of `spec.md` §4.9's `connect`/`listen`/`open_datagram_receive`.
pub type DispatchHandler = Box<Fn(Event) + Send + Sync>;

/// A response callback attached to one outgoing request. `FnMut`
/// rather than `Fn` because callers commonly want to capture and
/// mutate a oneshot-style completion slot.
pub type ResponseCallback = Box<FnMut(Event) + Send>;

struct PendingRequest {
    callback: ResponseCallback,
}

/// Per-connection table of in-flight requests, keyed by the 32-bit
/// monotonic request id carried in the wire header. Exactly one
/// terminal callback fires per entry: whichever of "matching response
/// arrived" or "timeout expired" calls `take` first.
pub struct RequestTable {
    entries: HashMap<u32, PendingRequest>,
    next_id: Wrapping<u32>,
}

impl RequestTable {
    pub fn new() -> RequestTable {
        RequestTable {
            entries: HashMap::new(),
            // 0 is reserved to mean "not a request."
            next_id: Wrapping(1),
        }
    }

    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += Wrapping(1);
        if self.next_id.0 == 0 {
            self.next_id = Wrapping(1);
        }
        id.0
    }

    pub fn insert(&mut self, id: u32, callback: ResponseCallback) {
        self.entries.insert(id, PendingRequest { callback });
    }

    /// Removes and returns the callback for `id`, if still pending.
    /// Both the response path and the timeout path call this; only
    /// the first caller gets `Some`.
    fn take(&mut self, id: u32) -> Option<ResponseCallback> {
        self.entries.remove(&id).map(|p| p.callback)
    }

    /// Withdraws an entry registered speculatively before its frame
    /// was actually sent, used when the send itself fails -- at that
    /// point neither the response path nor a timer has been armed, so
    /// nothing else will ever call `take` for this id.
    pub fn cancel(&mut self, id: u32) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains every pending entry, used when a connection is closed so
    /// each still-pending request receives a terminal `DISCONNECT`.
    pub fn drain(&mut self) -> Vec<ResponseCallback> {
        self.entries.drain().map(|(_, p)| p.callback).collect()
    }
}

/// Resolves an incoming message against a connection's request table:
/// if the header's request id matches a pending request, its callback
/// fires with the event and the entry is removed; otherwise the
/// connection's default dispatch handler fires. Exactly one of the two
/// paths runs per message, per the dispatch layer's invariant.
pub fn route_message(
    table: &Mutex<RequestTable>,
    default: &Option<Arc<DispatchHandler>>,
    request_id: u32,
    event: Event,
) {
    let matched = if request_id != 0 {
        table.lock().unwrap().take(request_id)
    } else {
        None
    };

    match matched {
        Some(mut cb) => cb(event),
        None => {
            if let Some(dh) = default {
                dh(event);
            }
        }
    }
}

/// Fires a `REQUEST_TIMEOUT` for `id` if it is still pending; a no-op
/// if the response already arrived and claimed the entry first.
pub fn fire_timeout(table: &Mutex<RequestTable>, id: u32, event: Event) {
    if let Some(mut cb) = table.lock().unwrap().take(id) {
        cb(event);
    }
}

type Job = Box<FnOnce() + Send>;

/// A fixed-size pool of plain OS threads that execute dispatch
/// callbacks. Reactor threads hand off a boxed closure per event
/// rather than invoking callbacks inline, keeping slow user code off
/// the I/O path.
/// `mpsc::Sender` is `Send` but not `Sync`; `Comm` hands this pool's
/// `submit` out to callbacks invoked from any reactor thread, so the
/// send half is kept behind its own lock to make the pool safely
/// shareable.
pub struct DispatchPool {
    tx: Mutex<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    pub fn new(size: usize) -> DispatchPool {
        assert!(size > 0, "dispatch pool must have at least one worker");
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let rx = rx.clone();
            let join = thread::Builder::new()
                .name(format!("acc-worker-{}", n))
                .spawn(move || loop {
                    let job = {
                        let rx = rx.lock().unwrap();
                        rx.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
                .expect("failed to spawn dispatch worker");
            workers.push(join);
        }
        DispatchPool {
            tx: Mutex::new(tx),
            workers,
        }
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.lock().unwrap().send(Box::new(job));
    }

    pub fn join(self) {
        drop(self.tx);
        for w in self.workers {
            let _ = w.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use address::Address;
    use event::{Event, ErrorCode};

    #[test]
    fn request_table_assigns_monotonic_ids() {
        let mut t = RequestTable::new();
        let a = t.next_request_id();
        let b = t.next_request_id();
        assert_eq!(b, a + 1);
        assert_ne!(a, 0);
    }

    #[test]
    fn only_one_terminal_callback_fires() {
        let table = Arc::new(Mutex::new(RequestTable::new()));
        let fired = Arc::new(Mutex::new(0));
        let id = {
            let mut t = table.lock().unwrap();
            let id = t.next_request_id();
            let fired = fired.clone();
            t.insert(
                id,
                Box::new(move |_e: Event| {
                    *fired.lock().unwrap() += 1;
                }),
            );
            id
        };

        // Response path claims it first.
        route_message(
            &table,
            &None,
            id,
            Event::message(
                Address::Unset,
                Address::Unset,
                ::header::MessageHeader::new(0, 0, id, 0),
                Vec::new(),
            ),
        );
        // The timeout path arrives "late" and must be a no-op.
        fire_timeout(
            &table,
            id,
            Event::error(Address::Unset, Address::Unset, ErrorCode::RequestTimeout),
        );

        assert_eq!(*fired.lock().unwrap(), 1);
    }
}
