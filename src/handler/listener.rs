//! The listening-socket `IOHandler` variant: accepts connections
//! until `WouldBlock`, pins each accepted socket to a reactor selected
//! from the pool by file descriptor, and delivers
//! `ConnectionEstablished` to the listener's dispatch handler.

use mio::net::TcpListener;
use mio::{Evented, Ready};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use address::Address;
use dispatch::DispatchHandler;
use event::Event;
use handler_map::HandlerMap;
use reactor::{self, Handler};
use reactor::pool::ReactorPool;

use super::data::DataHandler;
use super::{to_ipv4, ConnectionShared};

pub struct ListenerHandler {
    listener: TcpListener,
    local: Address,
    dispatch: Arc<DispatchHandler>,
    send_queue_capacity: usize,
    tcp_no_delay: bool,
    pool: Arc<ReactorPool>,
    handlers: Arc<HandlerMap>,
    accept_peer_updates: bool,
}

impl ListenerHandler {
    pub fn new(
        listener: TcpListener,
        local: Address,
        dispatch: Arc<DispatchHandler>,
        send_queue_capacity: usize,
        tcp_no_delay: bool,
        pool: Arc<ReactorPool>,
        handlers: Arc<HandlerMap>,
        accept_peer_updates: bool,
    ) -> ListenerHandler {
        ListenerHandler {
            listener,
            local,
            dispatch,
            send_queue_capacity,
            tcp_no_delay,
            pool,
            handlers,
            accept_peer_updates,
        }
    }

    pub fn local(&self) -> &Address {
        &self.local
    }

    fn accept_one(&mut self) -> io::Result<bool> {
        match self.listener.accept() {
            Ok((stream, peer_addr)) => {
                stream.set_nodelay(self.tcp_no_delay)?;
                let fd = stream.as_raw_fd() as usize;
                let remote = self.pool.select(fd);
                let token = reactor::alloc_token();
                let (ip, port) = to_ipv4(peer_addr);
                let peer = Address::from_inet(ip, port);

                let shared = Arc::new(ConnectionShared::new(
                    peer.clone(),
                    self.local.clone(),
                    self.send_queue_capacity,
                    remote.clone(),
                    token,
                ));
                *shared.dispatch.lock().unwrap() = Some(self.dispatch.clone());
                if let Err(e) = self.handlers.insert((ip, port), shared.clone()) {
                    // A live handler already claims this peer address
                    // (e.g. a near-simultaneous reconnect race); reject
                    // the new socket rather than silently shadowing the
                    // existing one in the Handler Map.
                    warn!("dropping accepted connection from {}: {}", peer, e);
                    return Ok(true);
                }

                let handler = DataHandler::new(
                    stream,
                    shared.clone(),
                    remote.clone(),
                    true,
                    self.handlers.clone(),
                    self.accept_peer_updates,
                );
                remote.add_interest(token, Ready::readable(), Box::new(handler));

                (self.dispatch)(Event::established(peer, self.local.clone()));
                Ok(true)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Handler for ListenerHandler {
    fn evented(&self) -> &Evented {
        &self.listener
    }

    fn on_readable(&mut self) -> io::Result<()> {
        loop {
            if !self.accept_one()? {
                return Ok(());
            }
        }
    }

    fn on_writable(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn on_error(&mut self, err: io::Error) {
        error!("listener error on {}: {}", self.local, err);
    }
}
