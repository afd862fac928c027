//! One `Reactor` per worker thread: owns a platform I/O multiplexer
//! (`mio::Poll`, edge-triggered where available), a timer heap, and a
//! removal-schedule queue. This is the component the rest of the core
//! is a client of.
//!
//! Cross-thread requests into a `Reactor` (arming interest from a
//! `Comm` call on an application thread, scheduling a timer from
//! outside) are serialized through a `Remote`: an mpsc command queue
//! paired with an `mio::Registration`/`SetReadiness` used purely to
//! wake the blocked `poll_once` call. The registration/timer heap
//! themselves are touched only from the reactor's own thread.

pub mod pool;
pub mod timer;

use mio::{self, Evented, Poll, PollOpt, Ready, Token};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering, ATOMIC_USIZE_INIT};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use self::timer::{TimerHeap, TimerId};

/// The platform-agnostic per-socket callback surface a `Reactor`
/// drives. Concrete `IOHandler` variants (data connection, listener,
/// datagram, raw) implement this instead of exposing their
/// platform-specific readiness notifications directly, per the
/// "virtual dispatch across platform I/O events" redesign.
pub trait Handler: Send {
    /// The underlying socket, registered with the multiplexer.
    fn evented(&self) -> &Evented;

    /// Called when the socket is readable. Implementations must drain
    /// the socket until `WouldBlock` in edge-triggered mode to avoid
    /// starvation.
    fn on_readable(&mut self) -> io::Result<()>;

    /// Called when the socket is writable.
    fn on_writable(&mut self) -> io::Result<()>;

    /// Called for a synthesized per-socket error (never for the
    /// process-fatal multiplexer errors, which abort).
    fn on_error(&mut self, err: io::Error);

    /// Delivers a cross-thread datagram send to whichever handler
    /// variant supports it. A no-op default so only `DatagramHandler`
    /// needs to override it; lets `Remote::send_datagram` dispatch
    /// without the reactor knowing concrete handler types.
    fn send_datagram(&mut self, _bytes: Vec<u8>, _to: ::std::net::SocketAddr) {}
}

/// A handler queued for destruction: decommissioned, but kept alive
/// until its strong-reference count drops to one (held only by this
/// queue entry) and the grace delay has elapsed.
struct PendingRemoval {
    anchor: Arc<RemovalAnchor>,
    ready_at: Instant,
}

/// Wraps anything whose last strong reference should trigger teardown
/// (typically an `Arc<ConnectionShared>`) behind a uniform type so the
/// removal queue doesn't need to be generic over handler kinds.
pub trait Anchored: Send + Sync {
    fn strong_count(&self) -> usize;
}

struct RemovalAnchor(Box<Anchored>);

/// The grace delay between decommission and physical destruction,
/// protecting against the race where an event has already been
/// dequeued from the multiplexer but has not yet called into the
/// handler.
pub const GRACE_DELAY: Duration = Duration::from_millis(200);

/// How often an unexpired-but-still-referenced removal is re-checked.
const REMOVAL_RECHECK: Duration = Duration::from_millis(20);

const WAKE_TOKEN: Token = Token(0);
const FIRST_HANDLER_TOKEN: usize = 1;

/// Process-wide token counter. A `Token` only needs to be unique
/// within the `Poll` instance it's registered with, but a single
/// global counter lets any thread mint one (a listener accepting onto
/// a reactor selected from the pool, a connector dialing out) without
/// first hopping onto that reactor's own thread to ask for one.
static NEXT_TOKEN: AtomicUsize = ATOMIC_USIZE_INIT;

pub fn alloc_token() -> Token {
    Token(FIRST_HANDLER_TOKEN + NEXT_TOKEN.fetch_add(1, AtomicOrdering::SeqCst))
}

enum Command {
    AddInterest(Token, Ready, Box<Handler>),
    ModifyInterest(Token, Ready),
    RemoveInterest(Token),
    ScheduleRemoval(Box<Anchored>),
    AddTimer(Instant, Box<FnMut() + Send>),
    SendDatagram(Token, Vec<u8>, ::std::net::SocketAddr),
    Stop,
}

/// A cloneable handle used by other threads (and the owning thread's
/// own callers) to submit work to a `Reactor` without touching its
/// thread-confined state directly.
///
/// `mpsc::Sender` is `Send` but not `Sync`, and `Remote` is embedded by
/// value in `ConnectionShared`, which needs to be `Sync` to satisfy
/// `Anchored`'s supertrait bound once it's behind an `Arc` shared
/// across threads. Wrapped in a lock for the same reason
/// `DispatchPool` wraps its sender.
#[derive(Clone)]
pub struct Remote {
    tx: Arc<Mutex<mpsc::Sender<Command>>>,
    wake: mio::SetReadiness,
}

impl Remote {
    pub fn add_interest(&self, token: Token, mask: Ready, handler: Box<Handler>) {
        self.submit(Command::AddInterest(token, mask, handler));
    }

    pub fn modify_interest(&self, token: Token, mask: Ready) {
        self.submit(Command::ModifyInterest(token, mask));
    }

    pub fn remove_interest(&self, token: Token) {
        self.submit(Command::RemoveInterest(token));
    }

    pub fn schedule_removal(&self, anchor: Box<Anchored>) {
        self.submit(Command::ScheduleRemoval(anchor));
    }

    pub fn stop(&self) {
        self.submit(Command::Stop);
    }

    pub fn send_datagram(&self, token: Token, bytes: Vec<u8>, to: ::std::net::SocketAddr) {
        self.submit(Command::SendDatagram(token, bytes, to));
    }

    pub fn add_timer<F>(&self, deadline: Instant, cb: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.submit(Command::AddTimer(deadline, Box::new(cb)));
    }

    fn submit(&self, cmd: Command) {
        if self.tx.lock().unwrap().send(cmd).is_ok() {
            // Waking a reactor that has already shut down is harmless;
            // the command is simply never drained.
            let _ = self.wake.set_readiness(Ready::readable());
        }
    }
}

/// Drives one I/O multiplexer loop and one timer heap on exactly one
/// worker thread.
pub struct Reactor {
    poll: Poll,
    events: mio::Events,
    handlers: HashMap<Token, Box<Handler>>,
    timers: TimerHeap,
    timer_callbacks: HashMap<TimerId, Box<FnMut()>>,
    removals: Vec<PendingRemoval>,
    epoch: u64,
    command_rx: mpsc::Receiver<Command>,
    remote: Remote,
    running: bool,
}

impl Reactor {
    pub fn new() -> io::Result<Reactor> {
        let poll = Poll::new()?;
        let (registration, set_readiness) = mio::Registration::new2();
        poll.register(
            &registration,
            WAKE_TOKEN,
            Ready::readable(),
            PollOpt::edge(),
        )?;
        // The registration must outlive the Poll's interest in it; we
        // leak it into the handler table as an opaque no-op handler so
        // it keeps living at the `Reactor`'s lifetime.
        let (tx, rx) = mpsc::channel();
        let mut handlers: HashMap<Token, Box<Handler>> = HashMap::new();
        handlers.insert(WAKE_TOKEN, Box::new(WakeHandler(registration)));

        Ok(Reactor {
            poll,
            events: mio::Events::with_capacity(1024),
            handlers,
            timers: TimerHeap::new(),
            timer_callbacks: HashMap::new(),
            removals: Vec::new(),
            epoch: 0,
            command_rx: rx,
            remote: Remote {
                tx: Arc::new(Mutex::new(tx)),
                wake: set_readiness,
            },
            running: true,
        })
    }

    pub fn remote(&self) -> Remote {
        self.remote.clone()
    }

    /// Allocates a fresh token for a newly created handler. Sockets
    /// are assigned a token once, at registration time, and never
    /// migrate reactors or tokens for the socket's lifetime.
    pub fn next_token(&mut self) -> Token {
        alloc_token()
    }

    /// Registers `handler` for read/write readiness. Idempotent: a
    /// second call for a token already registered is a `modify`.
    pub fn add_interest(&mut self, token: Token, mask: Ready, handler: Box<Handler>) -> io::Result<()> {
        if self.handlers.contains_key(&token) {
            self.poll.reregister(handler.evented(), token, mask, PollOpt::edge())?;
        } else {
            self.poll.register(handler.evented(), token, mask, PollOpt::edge())?;
        }
        self.handlers.insert(token, handler);
        Ok(())
    }

    /// Atomically replaces the interest mask for an already-registered
    /// socket. A zero mask suspends notifications without removing the
    /// registration.
    pub fn modify_interest(&mut self, token: Token, mask: Ready) -> io::Result<()> {
        if let Some(handler) = self.handlers.get(&token) {
            self.poll.reregister(handler.evented(), token, mask, PollOpt::edge())?;
        }
        Ok(())
    }

    /// Removes a socket from the multiplexer. Must precede closing the
    /// socket itself. A failure here is process-fatal: it indicates a
    /// torn invariant in the multiplexer's bookkeeping.
    pub fn remove_interest(&mut self, token: Token) {
        if let Some(handler) = self.handlers.remove(&token) {
            if let Err(e) = self.poll.deregister(handler.evented()) {
                error!("deregister failed for {:?}: {} -- aborting", token, e);
                ::std::process::abort();
            }
        }
    }

    /// Moves a handler anchor to the removal queue. The anchor (an
    /// `Arc`-backed reference count) is actually dropped once its
    /// strong count falls to one (held only by this entry) and the
    /// grace delay has elapsed, from a timer callback on this thread.
    pub fn schedule_removal(&mut self, anchor: Box<Anchored>) {
        self.removals.push(PendingRemoval {
            anchor: Arc::new(RemovalAnchor(anchor)),
            ready_at: Instant::now() + GRACE_DELAY,
        });
    }

    /// Inserts an absolute-deadline timer, invoking `cb` once when it
    /// expires.
    pub fn add_timer<F>(&mut self, deadline: Instant, cb: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        let id = self.timers.insert(deadline);
        self.timer_callbacks.insert(id, Box::new(cb));
        id
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timer_callbacks.remove(&id);
    }

    /// Blocks up to the earlier of `next_deadline` and the timer
    /// heap's minimum; on wake, drains ready I/O events, then drains
    /// expired timers and due removals. Alternates between the two
    /// until neither yields work, then returns.
    pub fn poll_once(&mut self, next_deadline: Option<Instant>) -> io::Result<()> {
        loop {
            let wait = self.wait_duration(next_deadline);
            match self.poll.poll(&mut self.events, wait) {
                Ok(_) => {}
                Err(e) => {
                    error!("multiplexer poll failed: {} -- aborting", e);
                    ::std::process::abort();
                }
            }

            let mut did_work = false;
            did_work |= self.drain_io_events();
            did_work |= self.drain_commands();
            did_work |= self.drain_timers();
            did_work |= self.drain_removals();

            if !did_work {
                return Ok(());
            }
        }
    }

    fn wait_duration(&self, next_deadline: Option<Instant>) -> Option<Duration> {
        let now = Instant::now();
        let mut deadline = next_deadline;
        if let Some(t) = self.timers.next_deadline() {
            deadline = Some(match deadline {
                Some(d) if d < t => d,
                _ => t,
            });
        }
        if let Some(r) = self.next_removal_deadline() {
            deadline = Some(match deadline {
                Some(d) if d < r => d,
                _ => r,
            });
        }
        deadline.map(|d| if d > now { d - now } else { Duration::from_millis(0) })
    }

    fn next_removal_deadline(&self) -> Option<Instant> {
        self.removals.iter().map(|r| r.ready_at).min()
    }

    fn drain_io_events(&mut self) -> bool {
        let mut any = false;
        // Collect first: handler callbacks may themselves call back
        // into `add_interest`/`remove_interest`, which would otherwise
        // conflict with an in-progress iteration over `self.events`.
        let fired: Vec<(Token, Ready)> = self.events.iter().map(|e| (e.token(), e.readiness())).collect();
        for (token, readiness) in fired {
            if token == WAKE_TOKEN {
                continue;
            }
            any = true;
            if readiness.is_readable() {
                if let Some(handler) = self.handlers.get_mut(&token) {
                    if let Err(e) = handler.on_readable() {
                        handler.on_error(e);
                    }
                }
            }
            if readiness.is_writable() {
                if let Some(handler) = self.handlers.get_mut(&token) {
                    if let Err(e) = handler.on_writable() {
                        handler.on_error(e);
                    }
                }
            }
        }
        any
    }

    fn drain_commands(&mut self) -> bool {
        let mut any = false;
        while let Ok(cmd) = self.command_rx.try_recv() {
            any = true;
            match cmd {
                Command::AddInterest(token, mask, handler) => {
                    let _ = self.add_interest(token, mask, handler);
                }
                Command::ModifyInterest(token, mask) => {
                    let _ = self.modify_interest(token, mask);
                }
                Command::RemoveInterest(token) => {
                    self.remove_interest(token);
                }
                Command::ScheduleRemoval(anchor) => {
                    self.schedule_removal(anchor);
                }
                Command::AddTimer(deadline, cb) => {
                    self.timer_callbacks_push(deadline, cb);
                }
                Command::SendDatagram(token, bytes, to) => {
                    if let Some(handler) = self.handlers.get_mut(&token) {
                        handler.send_datagram(bytes, to);
                    }
                }
                Command::Stop => {
                    self.running = false;
                }
            }
        }
        any
    }

    fn timer_callbacks_push(&mut self, deadline: Instant, mut cb: Box<FnMut() + Send>) {
        let id = self.timers.insert(deadline);
        self.timer_callbacks.insert(id, Box::new(move || cb()));
    }

    fn drain_timers(&mut self) -> bool {
        let expired = self.timers.drain_expired(Instant::now());
        let any = !expired.is_empty();
        for id in expired {
            if let Some(mut cb) = self.timer_callbacks.remove(&id) {
                cb();
            }
        }
        any
    }

    fn drain_removals(&mut self) -> bool {
        let now = Instant::now();
        let before = self.removals.len();
        for r in &mut self.removals {
            if now >= r.ready_at && r.anchor.0.strong_count() > 1 {
                trace!("removal still referenced; rechecking shortly");
                r.ready_at = now + REMOVAL_RECHECK;
            }
        }
        self.removals
            .retain(|r| !(now >= r.ready_at && r.anchor.0.strong_count() <= 1));
        before != self.removals.len()
    }

    /// Increments the epoch counter used to order removal-queue
    /// entries deterministically in tests.
    pub fn epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// A no-op handler that keeps the wake-up `Registration` alive for as
/// long as the `Reactor` itself lives.
struct WakeHandler(mio::Registration);
impl Handler for WakeHandler {
    fn evented(&self) -> &Evented {
        &self.0
    }
    fn on_readable(&mut self) -> io::Result<()> {
        Ok(())
    }
    fn on_writable(&mut self) -> io::Result<()> {
        Ok(())
    }
    fn on_error(&mut self, _err: io::Error) {}
}
