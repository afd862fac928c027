//! Per-socket state shared across the four `IOHandler` variants:
//! buffers, poll interest, reference count, and the decommission
//! flag. Concrete variants live in sibling modules; this module holds
//! what's common to all of them.

pub mod data;
pub mod datagram;
pub mod listener;
pub mod raw;

pub use self::data::DataHandler;
pub use self::datagram::DatagramHandler;
pub use self::listener::ListenerHandler;
pub use self::raw::RawHandler;

use mio::{Ready, Token};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use address::Address;
use dispatch::{self, DispatchHandler, RequestTable, ResponseCallback};
use error::Error;
use event::{ErrorCode, Event};
use header::{self, MessageHeader};
use reactor::Remote;

/// State shared between the reactor thread (which owns the raw
/// socket and drives reads/writes) and any other thread that holds a
/// reference to the connection (enqueuing a send, looking it up via
/// the Handler Map, or holding a strong reference while a dispatched
/// event is in flight).
///
/// The `Arc` strong count over this structure directly implements the
/// spec's reference-counting invariant: every asynchronous handoff
/// that needs the connection to stay alive clones the `Arc`, and the
/// owning `Reactor` physically drops its own anchor clone -- the last
/// one -- only after decommission, `strong_count() == 1`, and the
/// grace delay have all been satisfied.
pub struct ConnectionShared {
    pub peer: Address,
    pub local: Address,
    pub proxy: Mutex<Option<String>>,
    pub decommissioned: AtomicBool,
    pub free_flag: AtomicBool,
    send_queue: Mutex<SendQueue>,
    pub dispatch: Mutex<Option<Arc<DispatchHandler>>>,
    /// The reactor this connection's socket is registered with. Used
    /// to arm write interest and to schedule request timeouts from
    /// whatever thread calls `send_request`, never touched directly.
    pub remote: Remote,
    /// The token this connection's socket is registered under on its
    /// owning reactor; stable for the connection's lifetime.
    pub token: Token,
    requests: Mutex<RequestTable>,
}

/// A free-flag style sentinel used only in debug assertions to catch
/// use-after-decommission bugs in tests; production code never reads
/// a handler after `free_flag` is set.
impl ConnectionShared {
    pub fn new(
        peer: Address,
        local: Address,
        capacity_bytes: usize,
        remote: Remote,
        token: Token,
    ) -> ConnectionShared {
        ConnectionShared {
            peer,
            local,
            proxy: Mutex::new(None),
            decommissioned: AtomicBool::new(false),
            free_flag: AtomicBool::new(false),
            send_queue: Mutex::new(SendQueue::new(capacity_bytes)),
            dispatch: Mutex::new(None),
            remote,
            token,
            requests: Mutex::new(RequestTable::new()),
        }
    }

    /// Assigns a request id, registers `callback` in the request table,
    /// *then* frames `payload` behind a request header and enqueues it
    /// for the reactor's write loop (arming write interest on the
    /// empty -> non-empty transition). The callback must already be
    /// pending before the frame is sent: on a fast loopback peer, the
    /// reactor thread can decode and route the response before this
    /// call returns, and `route_message` only finds a match if the
    /// entry is already there. Schedules a timeout that fires the same
    /// callback with `RequestTimeout` if no response arrives first.
    /// Whichever of the two paths runs first wins; the other is a
    /// no-op, per the request table's take-once semantics.
    pub fn send_request<F>(
        conn: &Arc<ConnectionShared>,
        command: u32,
        payload: Vec<u8>,
        timeout: Duration,
        callback: F,
    ) -> Result<(), Error>
    where
        F: FnMut(Event) + Send + 'static,
    {
        if conn.is_decommissioned() {
            return Err(Error::NotConnected);
        }

        let id = conn.requests.lock().unwrap().next_request_id();
        conn.requests
            .lock()
            .unwrap()
            .insert(id, Box::new(callback) as ResponseCallback);

        if let Err(e) = ConnectionShared::send_framed(conn, command, header::FLAG_REQUEST, id, payload) {
            conn.requests.lock().unwrap().cancel(id);
            return Err(e);
        }

        let peer = conn.peer.clone();
        let local = conn.local.clone();
        let conn = conn.clone();
        conn.remote.add_timer(Instant::now() + timeout, move || {
            dispatch::fire_timeout(
                &conn.requests,
                id,
                Event::error(peer.clone(), local.clone(), ErrorCode::RequestTimeout),
            );
        });

        Ok(())
    }

    /// Frames `payload` behind a header carrying `flags`/`request_id`
    /// with no response tracking, enqueuing it and arming write
    /// interest on the empty -> non-empty transition. Used for
    /// fire-and-forget sends: responses, and proxy-update broadcasts.
    pub fn send_framed(
        conn: &Arc<ConnectionShared>,
        command: u32,
        flags: u8,
        request_id: u32,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        let header = MessageHeader::new(command, flags, request_id, payload.len());
        let mut buf = ::bytes::BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(&payload);

        let was_empty = conn.enqueue(buf.to_vec())?;
        if was_empty {
            conn.remote
                .modify_interest(conn.token, Ready::readable() | Ready::writable());
        }
        Ok(())
    }

    /// Resolves an inbound message's request id against the pending
    /// request table, falling back to the connection's default
    /// dispatch handler. Called from the reactor thread once a full
    /// frame has been decoded.
    pub fn route_message(&self, header: MessageHeader, payload: Vec<u8>) {
        let event = Event::message(self.peer.clone(), self.local.clone(), header.clone(), payload);
        let default = self.dispatch.lock().unwrap().clone();
        dispatch::route_message(&self.requests, &default, header.request_id, event);
    }

    /// Fires a terminal `Disconnect` for every still-pending request,
    /// called once when the connection tears down.
    pub fn drain_requests(&self) -> Vec<ResponseCallback> {
        self.requests.lock().unwrap().drain()
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::Acquire)
    }

    pub fn decommission(&self) {
        self.decommissioned.store(true, Ordering::Release);
    }

    pub fn mark_freed(&self) {
        debug_assert!(
            !self.free_flag.swap(true, Ordering::AcqRel),
            "connection destroyed twice"
        );
    }

    /// Enqueues bytes for sending, failing fast if the per-connection
    /// byte budget is exhausted. Returns whether the queue was
    /// previously empty, so the caller can arm write interest only on
    /// the empty -> non-empty transition.
    pub fn enqueue(&self, bytes: Vec<u8>) -> Result<bool, Error> {
        if self.is_decommissioned() {
            return Err(Error::NotConnected);
        }
        let mut q = self.send_queue.lock().unwrap();
        q.push(bytes)
    }

    /// Pulls as many queued bytes as are available, for the reactor
    /// thread's write loop. Returns `None` once empty.
    pub fn dequeue(&self) -> Option<Vec<u8>> {
        let mut q = self.send_queue.lock().unwrap();
        q.pop()
    }

    pub fn send_queue_is_empty(&self) -> bool {
        self.send_queue.lock().unwrap().is_empty()
    }
}

/// `Arc::strong_count` over the connection's shared state is exactly
/// the spec's per-handler reference count: every asynchronous handoff
/// that needs the connection alive holds a clone.
impl ::reactor::Anchored for Arc<ConnectionShared> {
    fn strong_count(&self) -> usize {
        Arc::strong_count(self)
    }
}

/// A bounded, byte-counted FIFO of outbound buffers. Enqueues beyond
/// the configured capacity fail fast with `SendQueueFull`, per the
/// comm facade's backpressure policy -- this implementation never
/// blocks a caller the way the teacher's task-notifying `mpmc::Shared`
/// sink does, since here the producer may be on any thread, not just
/// an executor task.
struct SendQueue {
    capacity: usize,
    used: usize,
    items: ::std::collections::VecDeque<Vec<u8>>,
}

impl SendQueue {
    fn new(capacity: usize) -> SendQueue {
        SendQueue {
            capacity,
            used: 0,
            items: ::std::collections::VecDeque::new(),
        }
    }

    fn push(&mut self, bytes: Vec<u8>) -> Result<bool, Error> {
        if self.used + bytes.len() > self.capacity {
            return Err(Error::SendQueueFull);
        }
        let was_empty = self.items.is_empty();
        self.used += bytes.len();
        self.items.push_back(bytes);
        Ok(was_empty)
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        let item = self.items.pop_front();
        if let Some(ref b) = item {
            self.used -= b.len();
        }
        item
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Narrows a socket address to the IPv4 pair `Address::Inet` carries;
/// the core only ever addresses IPv4 peers, per `address.rs`.
pub fn to_ipv4(addr: ::std::net::SocketAddr) -> (Ipv4Addr, u16) {
    match addr {
        ::std::net::SocketAddr::V4(v4) => (*v4.ip(), v4.port()),
        ::std::net::SocketAddr::V6(_) => (Ipv4Addr::UNSPECIFIED, 0),
    }
}
