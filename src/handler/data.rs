//! The data-connection `IOHandler` variant: a single TCP stream
//! driving the INIT -> CONNECTING -> CONNECTED -> DISCONNECTING ->
//! DECOMMISSIONED lifecycle, framing reads behind the fixed 32-byte
//! message header and draining the shared send queue on writability.
//!
//! Owned exclusively by the reactor thread it's registered with --
//! nothing here is shared across threads except through
//! `ConnectionShared`, which is.

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Evented, Ready};
use std::io::{self, Read, Write};
use std::sync::Arc;

use event::{ErrorCode, Event};
use handler_map::HandlerMap;
use header::{self, MessageHeader};
use reactor::{Handler, Remote};

use super::ConnectionShared;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Connecting,
    Connected,
    Disconnecting,
    Decommissioned,
}

pub struct DataHandler {
    stream: TcpStream,
    state: State,
    shared: Arc<ConnectionShared>,
    remote: Remote,
    read_buf: BytesMut,
    pending_header: Option<MessageHeader>,
    pending_write: Option<(Vec<u8>, usize)>,
    /// Where to merge an inbound `PROXY_UPDATE` frame's table, and
    /// whether this connection is allowed to originate one -- gated by
    /// `config.proxy_source`, since a `Manual`-configured `Comm` trusts
    /// only its own `add_proxy` calls, not whatever a peer claims.
    handlers: Arc<HandlerMap>,
    accept_peer_updates: bool,
}

impl DataHandler {
    /// Wraps an already-connected or still-connecting stream.
    /// `connected` is true for accepted sockets (which never pass
    /// through CONNECTING) and false for sockets from an in-flight
    /// non-blocking `connect`.
    pub fn new(
        stream: TcpStream,
        shared: Arc<ConnectionShared>,
        remote: Remote,
        connected: bool,
        handlers: Arc<HandlerMap>,
        accept_peer_updates: bool,
    ) -> DataHandler {
        DataHandler {
            stream,
            state: if connected {
                State::Connected
            } else {
                State::Connecting
            },
            shared,
            remote,
            read_buf: BytesMut::with_capacity(8 * 1024),
            pending_header: None,
            pending_write: None,
            handlers,
            accept_peer_updates,
        }
    }

    pub fn shared(&self) -> &Arc<ConnectionShared> {
        &self.shared
    }

    fn read_loop(&mut self) -> io::Result<()> {
        let mut tmp = [0u8; 8192];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => {
                    self.teardown(ErrorCode::Disconnected);
                    return Ok(());
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&tmp[..n]);
                    self.drain_frames();
                    if self.state == State::Decommissioned {
                        return Ok(());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Pulls as many complete frames as are buffered, decoding the
    /// header, verifying its checksum, and waiting for the full
    /// payload to arrive before handing the frame to the connection's
    /// dispatch layer.
    fn drain_frames(&mut self) {
        loop {
            if self.pending_header.is_none() {
                if self.read_buf.len() < header::HEADER_LEN {
                    return;
                }
                let raw = self.read_buf.split_to(header::HEADER_LEN);
                match MessageHeader::decode(&raw) {
                    Ok(h) => self.pending_header = Some(h),
                    Err(_) => {
                        self.teardown(ErrorCode::HeaderChecksumFailed);
                        return;
                    }
                }
            }

            let needed = self.pending_header.as_ref().unwrap().payload_len();
            if self.read_buf.len() < needed {
                return;
            }
            let payload = self.read_buf.split_to(needed).to_vec();
            let header = self.pending_header.take().unwrap();

            if header.is_proxy_update() {
                if self.accept_peer_updates {
                    self.merge_proxy_update(&payload);
                }
                continue;
            }
            self.shared.route_message(header, payload);
        }
    }

    /// Merges every entry of an inbound proxy-update frame into the
    /// Handler Map, skipping the sender's own `"*"` marker entry --
    /// this connection's peer address is already known from `accept`,
    /// and re-deriving a proxy name for it from an untrusted marker
    /// would let any peer claim an arbitrary mnemonic for itself.
    fn merge_proxy_update(&self, payload: &[u8]) {
        let entries = match header::decode_proxy_update(payload) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("malformed proxy update from {}: {}", self.shared.peer, e);
                return;
            }
        };
        for entry in entries {
            if entry.name == header::SELF_MARKER {
                continue;
            }
            if let Err(e) = self.handlers.add_proxy(entry.name.clone(), (entry.addr, entry.port)) {
                warn!(
                    "rejecting proxy update for {} from {}: {}",
                    entry.name, self.shared.peer, e
                );
            }
        }
    }

    fn write_loop(&mut self) -> io::Result<()> {
        loop {
            if self.pending_write.is_none() {
                match self.shared.dequeue() {
                    Some(buf) => self.pending_write = Some((buf, 0)),
                    None => {
                        self.remote
                            .modify_interest(self.shared.token, Ready::readable());
                        return Ok(());
                    }
                }
            }
            let (buf, offset) = self.pending_write.take().unwrap();
            match self.stream.write(&buf[offset..]) {
                Ok(n) if offset + n == buf.len() => {}
                Ok(n) => {
                    self.pending_write = Some((buf, offset + n));
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending_write = Some((buf, offset));
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Transitions DISCONNECTING -> DECOMMISSIONED: marks the shared
    /// state decommissioned, fires a terminal `Disconnect` to the
    /// default handler and every still-pending request, removes the
    /// socket from the multiplexer, and schedules the connection's
    /// grace-delayed destruction. Idempotent.
    fn teardown(&mut self, code: ErrorCode) {
        if self.state == State::Decommissioned {
            return;
        }
        self.state = State::Disconnecting;
        self.shared.decommission();

        let peer = self.shared.peer.clone();
        let local = self.shared.local.clone();
        if let Some(dh) = self.shared.dispatch.lock().unwrap().clone() {
            dh(Event::disconnect(peer.clone(), local.clone(), code));
        }
        for mut cb in self.shared.drain_requests() {
            cb(Event::error(peer.clone(), local.clone(), ErrorCode::Disconnected));
        }

        self.remote.remove_interest(self.shared.token);
        self.remote
            .schedule_removal(Box::new(self.shared.clone()));
        self.state = State::Decommissioned;
    }
}

impl Handler for DataHandler {
    fn evented(&self) -> &Evented {
        &self.stream
    }

    fn on_readable(&mut self) -> io::Result<()> {
        self.read_loop()
    }

    fn on_writable(&mut self) -> io::Result<()> {
        if self.state == State::Connecting {
            match self.stream.take_error()? {
                Some(e) => return Err(e),
                None => {
                    self.state = State::Connected;
                    let event =
                        Event::established(self.shared.peer.clone(), self.shared.local.clone());
                    if let Some(dh) = self.shared.dispatch.lock().unwrap().clone() {
                        dh(event);
                    }
                }
            }
        }
        self.write_loop()
    }

    fn on_error(&mut self, err: io::Error) {
        warn!("data connection {} failed: {}", self.shared.peer, err);
        self.teardown(ErrorCode::Io);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use address::Address;
    use reactor::Reactor;

    #[test]
    fn teardown_is_idempotent() {
        let mut reactor = Reactor::new().unwrap();
        let remote = reactor.remote();
        let token = reactor.next_token();
        let shared = Arc::new(ConnectionShared::new(
            Address::Unset,
            Address::Unset,
            4096,
            remote.clone(),
            token,
        ));

        // A loopback pair stands in for a real accepted/connected
        // socket; only the state machine's bookkeeping is exercised
        // here, not actual I/O.
        let listener = ::std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = ::std::net::TcpStream::connect(addr).unwrap();
        let stream = TcpStream::from_stream(client).unwrap();

        let handlers = Arc::new(::handler_map::HandlerMap::new(::tacho::new().0));
        let mut handler = DataHandler::new(stream, shared.clone(), remote, true, handlers, false);
        handler.teardown(ErrorCode::Disconnected);
        assert!(shared.is_decommissioned());
        // A second teardown must not panic or double-fire callbacks.
        handler.teardown(ErrorCode::Disconnected);
    }
}
