//! The raw-socket `IOHandler` variant. Resolves the spec's open
//! question on raw-socket decommission semantics: a raw handler
//! shares the same `Arc`-based refcount and grace-delayed
//! decommission lifecycle as a data connection (see `handler::data`),
//! since nothing about releasing the underlying file descriptor
//! safely is specific to whether frames are length-prefixed. Unlike a
//! data connection, reads are delivered whole, with no header parsing
//! or checksum -- the payload is opaque to the core.

use mio::net::TcpStream;
use mio::{Evented, Ready};
use std::io::{self, Read, Write};
use std::sync::Arc;

use event::{ErrorCode, Event};
use reactor::{Handler, Remote};

use super::ConnectionShared;

pub struct RawHandler {
    stream: TcpStream,
    shared: Arc<ConnectionShared>,
    remote: Remote,
    pending_write: Option<(Vec<u8>, usize)>,
}

impl RawHandler {
    pub fn new(stream: TcpStream, shared: Arc<ConnectionShared>, remote: Remote) -> RawHandler {
        RawHandler {
            stream,
            shared,
            remote,
            pending_write: None,
        }
    }

    pub fn shared(&self) -> &Arc<ConnectionShared> {
        &self.shared
    }

    fn teardown(&mut self, code: ErrorCode) {
        if self.shared.is_decommissioned() {
            return;
        }
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
    }
}

impl Handler for RawHandler {
    fn evented(&self) -> &Evented {
        &self.stream
    }

    fn on_readable(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 65536];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.teardown(ErrorCode::Disconnected);
                    return Ok(());
                }
                Ok(n) => {
                    let event = Event::message(
                        self.shared.peer.clone(),
                        self.shared.local.clone(),
                        ::header::MessageHeader::new(0, 0, 0, n),
                        buf[..n].to_vec(),
                    );
                    if let Some(dh) = self.shared.dispatch.lock().unwrap().clone() {
                        dh(event);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn on_writable(&mut self) -> io::Result<()> {
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

    fn on_error(&mut self, err: io::Error) {
        warn!("raw socket {} failed: {}", self.shared.peer, err);
        self.teardown(ErrorCode::Io);
    }
}
