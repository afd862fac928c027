//! The datagram `IOHandler` variant: a bound UDP socket delivering
//! each complete datagram as a `Message` event. Unlike a data
//! connection, there is no framing to assemble -- one `recv_from`
//! call is one message, and one `send_to` call is one write, per
//! datagram semantics.

use mio::net::UdpSocket;
use mio::{Evented, Ready, Token};
use std::io;
use std::sync::Arc;

use address::Address;
use dispatch::DispatchHandler;
use event::Event;
use reactor::{Handler, Remote};

use super::to_ipv4;

pub struct DatagramHandler {
    socket: UdpSocket,
    local: Address,
    dispatch: Arc<DispatchHandler>,
    remote: Remote,
    token: Token,
    send_queue: ::std::collections::VecDeque<(Vec<u8>, ::std::net::SocketAddr)>,
}

impl DatagramHandler {
    pub fn new(
        socket: UdpSocket,
        local: Address,
        dispatch: Arc<DispatchHandler>,
        remote: Remote,
        token: Token,
    ) -> DatagramHandler {
        DatagramHandler {
            socket,
            local,
            dispatch,
            remote,
            token,
            send_queue: ::std::collections::VecDeque::new(),
        }
    }

    /// Queues a datagram for `to`. Datagram writes are best-effort and
    /// not subject to the byte-bounded backpressure policy a data
    /// connection's send queue enforces.
    pub fn send_to(&mut self, bytes: Vec<u8>, to: ::std::net::SocketAddr) {
        let was_empty = self.send_queue.is_empty();
        self.send_queue.push_back((bytes, to));
        if was_empty {
            self.remote
                .modify_interest(self.token, Ready::readable() | Ready::writable());
        }
    }

    fn drain_reads(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let (ip, port) = to_ipv4(from);
                    let peer = Address::from_inet(ip, port);
                    let event = Event::message(
                        peer,
                        self.local.clone(),
                        ::header::MessageHeader::new(0, 0, 0, n),
                        buf[..n].to_vec(),
                    );
                    (self.dispatch)(event);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn drain_writes(&mut self) -> io::Result<()> {
        while let Some((bytes, to)) = self.send_queue.pop_front() {
            match self.socket.send_to(&bytes, &to) {
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.send_queue.push_front((bytes, to));
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        self.remote.modify_interest(self.token, Ready::readable());
        Ok(())
    }
}

impl Handler for DatagramHandler {
    fn evented(&self) -> &Evented {
        &self.socket
    }

    fn on_readable(&mut self) -> io::Result<()> {
        self.drain_reads()
    }

    fn on_writable(&mut self) -> io::Result<()> {
        self.drain_writes()
    }

    fn on_error(&mut self, err: io::Error) {
        error!("datagram socket error on {}: {}", self.local, err);
    }

    fn send_datagram(&mut self, bytes: Vec<u8>, to: ::std::net::SocketAddr) {
        self.send_to(bytes, to);
    }
}
