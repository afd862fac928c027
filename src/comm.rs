//! The `Comm` facade: the crate's single public entry point, gluing
//! the reactor pool, the dispatch pool, and the Handler Map together
//! behind the operation table from `spec.md` §4.9.
//!
//! Every dispatch callback handed to `Comm` is wrapped so it actually
//! runs on the dispatch pool, not the reactor thread that decoded the
//! frame -- reactor threads only ever decode a header and hand the
//! resulting `Event` off, per the concurrency model.

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::Ready;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use address::Address;
use config::{AccConfig, ProxySource};
use dispatch::DispatchPool;
use error::{Error, Result};
use event::Event;
use handler::data::DataHandler;
use handler::datagram::DatagramHandler;
use handler::listener::ListenerHandler;
use handler::raw::RawHandler;
use handler::{to_ipv4, ConnectionShared};
use handler_map::HandlerMap;
use header;
use reactor::pool::ReactorPool;
use reactor::{self, Handler, Remote};
use tacho;

/// A user-supplied callback for events not claimed by a pending
/// request: connection lifecycle transitions, unsolicited messages,
/// and datagrams.
pub type Callback = Arc<Fn(Event) + Send + Sync>;

pub struct Comm {
    pool: Arc<ReactorPool>,
    dispatch_pool: Arc<DispatchPool>,
    handlers: Arc<HandlerMap>,
    send_queue_capacity: usize,
    connect_timeout: Duration,
    tcp_no_delay: bool,
    accept_peer_proxy_updates: bool,
    datagrams: Mutex<Vec<(::mio::Token, Remote)>>,
    /// The root of this `Comm`'s metrics tree. `HandlerMap` scopes its
    /// own instruments under it; a caller that wants to expose them
    /// (admin HTTP endpoint, periodic log line) reports through
    /// `metrics_reporter` rather than the core opening a socket for it
    /// itself, per the Non-goals excluding admin/CLI surfaces from ACC.
    pub metrics_reporter: tacho::Reporter,
}

impl Comm {
    /// Brings up the reactor pool and dispatch pool described by
    /// `config`. No sockets are opened until `connect`/`listen`/
    /// `open_datagram_receive` are called.
    pub fn new(config: &AccConfig) -> Result<Comm> {
        let pool = ReactorPool::new(config.reactors)?;
        let dispatch_pool = DispatchPool::new(config.workers);
        let (metrics, metrics_reporter) = tacho::new();
        Ok(Comm {
            pool: Arc::new(pool),
            dispatch_pool: Arc::new(dispatch_pool),
            handlers: Arc::new(HandlerMap::new(metrics)),
            send_queue_capacity: config.send_queue_bytes,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            tcp_no_delay: config.tcp_no_delay,
            accept_peer_proxy_updates: config.proxy_source == ProxySource::Peer,
            datagrams: Mutex::new(Vec::new()),
            metrics_reporter,
        })
    }

    fn wrap_dispatch(&self, cb: Callback) -> Arc<::dispatch::DispatchHandler> {
        let pool = self.dispatch_pool.clone();
        Arc::new(Box::new(move |event: Event| {
            let cb = cb.clone();
            pool.submit(move || cb(event));
        }) as ::dispatch::DispatchHandler)
    }

    /// Opens a non-blocking outbound connection to `addr`. Fails fast
    /// with `AlreadyConnected` if a live connection to that address
    /// already exists in the Handler Map.
    pub fn connect(&self, addr: SocketAddr, dispatch: Callback) -> Result<Arc<ConnectionShared>> {
        let (ip, port) = to_ipv4(addr);
        if self.handlers.lookup(&Address::from_inet(ip, port)).is_some() {
            return Err(Error::AlreadyConnected);
        }

        let stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(self.tcp_no_delay)?;
        let fd = stream.as_raw_fd() as usize;
        let remote = self.pool.select(fd);
        let token = reactor::alloc_token();

        let shared = Arc::new(ConnectionShared::new(
            Address::from_inet(ip, port),
            Address::Unset,
            self.send_queue_capacity,
            remote.clone(),
            token,
        ));
        *shared.dispatch.lock().unwrap() = Some(self.wrap_dispatch(dispatch));
        self.handlers.insert((ip, port), shared.clone())?;

        let handler = DataHandler::new(
            stream,
            shared.clone(),
            remote.clone(),
            false,
            self.handlers.clone(),
            self.accept_peer_proxy_updates,
        );
        remote.add_interest(token, Ready::writable(), Box::new(handler));

        let peer = shared.peer.clone();
        let local = shared.local.clone();
        let conn = shared.clone();
        remote.add_timer(::std::time::Instant::now() + self.connect_timeout, move || {
            if !conn.is_decommissioned() {
                // Still CONNECTING after the deadline: treat it like a
                // dead peer rather than leaving it to linger forever.
                conn.decommission();
                if let Some(dh) = conn.dispatch.lock().unwrap().clone() {
                    dh(Event::disconnect(peer.clone(), local.clone(), ::event::ErrorCode::RequestTimeout));
                }
            }
        });

        Ok(shared)
    }

    /// Binds a listening socket and registers it with a reactor
    /// selected from the pool. Every accepted connection is delivered
    /// to `dispatch` as `ConnectionEstablished`, then shares that same
    /// callback for its own lifetime unless the caller later replaces
    /// it (not currently supported -- see DESIGN.md).
    pub fn listen(&self, addr: SocketAddr, dispatch: Callback) -> Result<()> {
        let listener = TcpListener::bind(&addr).map_err(Error::BindFailed)?;
        let fd = listener.as_raw_fd() as usize;
        let remote = self.pool.select(fd);
        let token = reactor::alloc_token();
        let (ip, port) = to_ipv4(addr);
        let local = Address::from_inet(ip, port);

        let handler = ListenerHandler::new(
            listener,
            local,
            self.wrap_dispatch(dispatch),
            self.send_queue_capacity,
            self.tcp_no_delay,
            self.pool.clone(),
            self.handlers.clone(),
            self.accept_peer_proxy_updates,
        );
        remote.add_interest(token, Ready::readable(), Box::new(handler));
        Ok(())
    }

    /// Sends a request on the connection addressed by `addr` (which
    /// may be a proxy name, resolved through the Handler Map), firing
    /// `callback` exactly once: on the matching response, or on
    /// `RequestTimeout` if none arrives within `timeout`.
    pub fn send_request<F>(
        &self,
        addr: &Address,
        command: u32,
        payload: Vec<u8>,
        timeout: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let conn = self.handlers.lookup(addr).ok_or(Error::NotConnected)?;
        ConnectionShared::send_request(&conn, command, payload, timeout, callback)
    }

    /// Sends a fire-and-forget response carrying the original
    /// request's id, so the peer's request table can match it.
    pub fn send_response(&self, addr: &Address, request_id: u32, payload: Vec<u8>) -> Result<()> {
        let conn = self.handlers.lookup(addr).ok_or(Error::NotConnected)?;
        ConnectionShared::send_framed(&conn, 0, header::FLAG_RESPONSE, request_id, payload)
    }

    /// Binds a UDP socket for receiving datagrams, delivering each as
    /// a `Message` event. Returns a token identifying the socket for
    /// subsequent `send_datagram` calls.
    pub fn open_datagram_receive(&self, addr: SocketAddr, dispatch: Callback) -> Result<::mio::Token> {
        let socket = UdpSocket::bind(&addr).map_err(Error::BindFailed)?;
        let fd = socket.as_raw_fd() as usize;
        let remote = self.pool.select(fd);
        let token = reactor::alloc_token();
        let (ip, port) = to_ipv4(addr);
        let local = Address::from_inet(ip, port);

        let handler = DatagramHandler::new(socket, local, self.wrap_dispatch(dispatch), remote.clone(), token);
        remote.add_interest(token, Ready::readable(), Box::new(handler));
        self.datagrams.lock().unwrap().push((token, remote));
        Ok(token)
    }

    /// Queues a datagram for `to` on the socket identified by `token`.
    pub fn send_datagram(&self, token: ::mio::Token, bytes: Vec<u8>, to: SocketAddr) -> Result<()> {
        let datagrams = self.datagrams.lock().unwrap();
        let remote = datagrams
            .iter()
            .find(|&&(t, _)| t == token)
            .map(|&(_, ref r)| r.clone())
            .ok_or(Error::NotConnected)?;
        remote.send_datagram(token, bytes, to);
        Ok(())
    }

    /// Registers a raw, header-less socket. Shares the data
    /// connection's decommission/refcount lifecycle (see
    /// `handler::raw`), but reads are delivered whole, with no header
    /// parsing.
    pub fn add_raw(&self, addr: SocketAddr, dispatch: Callback) -> Result<Arc<ConnectionShared>> {
        let stream = TcpStream::connect(&addr)?;
        let fd = stream.as_raw_fd() as usize;
        let remote = self.pool.select(fd);
        let token = reactor::alloc_token();
        let (ip, port) = to_ipv4(addr);

        let shared = Arc::new(ConnectionShared::new(
            Address::from_inet(ip, port),
            Address::Unset,
            self.send_queue_capacity,
            remote.clone(),
            token,
        ));
        *shared.dispatch.lock().unwrap() = Some(self.wrap_dispatch(dispatch));
        self.handlers.insert((ip, port), shared.clone())?;

        let handler = RawHandler::new(stream, shared.clone(), remote.clone());
        remote.add_interest(token, Ready::readable() | Ready::writable(), Box::new(handler));
        Ok(shared)
    }

    /// Associates `name` with the already-connected inet address
    /// `inet`, broadcasting the updated mapping to every connection
    /// currently known to the Handler Map.
    pub fn add_proxy(&self, name: String, inet: SocketAddr) -> Result<()> {
        let (ip, port) = to_ipv4(inet);
        self.handlers.add_proxy(name, (ip, port))
    }

    /// Closes the connection at `addr`, if any. Synthesizes a terminal
    /// `Disconnect` for any requests still pending against it.
    pub fn close(&self, addr: &Address) -> Result<()> {
        let conn = self.handlers.lookup(addr).ok_or(Error::NotConnected)?;
        conn.decommission();
        conn.remote.remove_interest(conn.token);
        conn.remote.schedule_removal(Box::new(conn.clone()));
        if let Address::Inet(ip, port) = *addr {
            self.handlers.remove((ip, port));
        }
        Ok(())
    }

    /// Schedules `callback` to fire once, `after` from now, on
    /// whichever reactor has the least natural affinity to anything
    /// else (see `ReactorPool::any`).
    pub fn set_timer<F>(&self, after: Duration, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.pool
            .any()
            .add_timer(::std::time::Instant::now() + after, callback);
    }

    /// Blocks the calling thread until every reactor has stopped.
    /// Typical usage spawns `Comm` on its own thread (or the process's
    /// main thread) and calls `run` after registering listeners.
    pub fn run(&self) {
        // Reactors already drive themselves on their own threads from
        // `ReactorPool::new`; `run` just waits for every one of them
        // to exit, which only happens once `shutdown` has told them
        // all to stop.
        self.pool.join_all();
    }

    /// Stops every reactor thread. Outstanding sends in flight when
    /// this is called may be dropped.
    pub fn shutdown(&self) {
        for remote in self.pool.all() {
            remote.stop();
        }
    }
}
