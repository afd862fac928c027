//! The value delivered to dispatch handlers for every connection
//! lifecycle transition, inbound message, timer firing, or error.

use std::time::Instant;

use address::Address;
use error::Error;
use header::MessageHeader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    ConnectionEstablished,
    Disconnect,
    Message,
    Timer,
    Error,
}

/// Carries everything a dispatch handler needs to react to a
/// connection-lifecycle or protocol occurrence without reaching back
/// into the core's internal state.
#[derive(Debug)]
pub struct Event {
    pub kind: EventKind,
    pub peer: Address,
    pub local: Address,
    pub proxy: Option<String>,
    pub error: ErrorCode,
    pub payload: Vec<u8>,
    pub header: Option<MessageHeader>,
    pub arrival: Instant,
}

/// A cheap, `Copy`-able summary of an `Error` for embedding in an
/// `Event`, since `Error` itself carries non-`Clone` `io::Error`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    ResolutionFailed,
    BindFailed,
    AlreadyConnected,
    NotConnected,
    SendQueueFull,
    PollError,
    HeaderChecksumFailed,
    RequestTimeout,
    Disconnected,
    ProxyMappingConflict,
    AlreadyExists,
    Io,
    Config,
}

impl<'a> From<&'a Error> for ErrorCode {
    fn from(e: &'a Error) -> ErrorCode {
        match *e {
            Error::Ok => ErrorCode::Ok,
            Error::ResolutionFailed => ErrorCode::ResolutionFailed,
            Error::BindFailed(_) => ErrorCode::BindFailed,
            Error::AlreadyConnected => ErrorCode::AlreadyConnected,
            Error::NotConnected => ErrorCode::NotConnected,
            Error::SendQueueFull => ErrorCode::SendQueueFull,
            Error::PollError(_) => ErrorCode::PollError,
            Error::HeaderChecksumFailed => ErrorCode::HeaderChecksumFailed,
            Error::RequestTimeout => ErrorCode::RequestTimeout,
            Error::Disconnected => ErrorCode::Disconnected,
            Error::ProxyMappingConflict => ErrorCode::ProxyMappingConflict,
            Error::AlreadyExists => ErrorCode::AlreadyExists,
            Error::Io(_) => ErrorCode::Io,
            Error::Config(_) => ErrorCode::Config,
        }
    }
}

impl Event {
    pub fn established(peer: Address, local: Address) -> Event {
        Event {
            kind: EventKind::ConnectionEstablished,
            peer,
            local,
            proxy: None,
            error: ErrorCode::Ok,
            payload: Vec::new(),
            header: None,
            arrival: Instant::now(),
        }
    }

    pub fn disconnect(peer: Address, local: Address, code: ErrorCode) -> Event {
        Event {
            kind: EventKind::Disconnect,
            peer,
            local,
            proxy: None,
            error: code,
            payload: Vec::new(),
            header: None,
            arrival: Instant::now(),
        }
    }

    pub fn message(peer: Address, local: Address, header: MessageHeader, payload: Vec<u8>) -> Event {
        Event {
            kind: EventKind::Message,
            peer,
            local,
            proxy: None,
            error: ErrorCode::Ok,
            payload,
            header: Some(header),
            arrival: Instant::now(),
        }
    }

    pub fn timer() -> Event {
        Event {
            kind: EventKind::Timer,
            peer: Address::Unset,
            local: Address::Unset,
            proxy: None,
            error: ErrorCode::Ok,
            payload: Vec::new(),
            header: None,
            arrival: Instant::now(),
        }
    }

    pub fn error(peer: Address, local: Address, code: ErrorCode) -> Event {
        Event {
            kind: EventKind::Error,
            peer,
            local,
            proxy: None,
            error: code,
            payload: Vec::new(),
            header: None,
            arrival: Instant::now(),
        }
    }
}
