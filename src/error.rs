//! The error taxonomy shared by every layer of the communication core.

use std::error;
use std::fmt;
use std::io;
use std::sync::mpsc;

/// A single error type carries every failure kind the core can surface,
/// mirroring the taxonomy enumerated for the original `Comm` API rather
/// than modeling each subsystem's errors separately.
#[derive(Debug)]
pub enum Error {
    /// No error; used where an `Event`'s error field must have a value.
    Ok,
    /// A proxy name could not be translated to an inet address.
    ResolutionFailed,
    /// A listener or datagram socket could not be bound.
    BindFailed(io::Error),
    /// `connect` was called for an address that already has a live handler.
    AlreadyConnected,
    /// An operation was attempted against an address with no live handler.
    NotConnected,
    /// A connection's send queue is at capacity.
    SendQueueFull,
    /// The I/O multiplexer reported an error polling for readiness.
    PollError(io::Error),
    /// A message header's checksum did not match its contents.
    HeaderChecksumFailed,
    /// A pending request's timeout elapsed before a response arrived.
    RequestTimeout,
    /// The peer closed, reset, or otherwise terminated the connection.
    Disconnected,
    /// `add_proxy` was given a mapping that conflicts with a live one.
    ProxyMappingConflict,
    /// An inet address is already registered to a different live handler.
    AlreadyExists,
    /// Wraps an I/O error that doesn't fit a more specific variant.
    Io(io::Error),
    /// Wraps a configuration parse error.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Ok => write!(f, "ok"),
            Error::ResolutionFailed => write!(f, "proxy name resolution failed"),
            Error::BindFailed(ref e) => write!(f, "bind failed: {}", e),
            Error::AlreadyConnected => write!(f, "already connected"),
            Error::NotConnected => write!(f, "not connected"),
            Error::SendQueueFull => write!(f, "send queue full"),
            Error::PollError(ref e) => write!(f, "poll error: {}", e),
            Error::HeaderChecksumFailed => write!(f, "header checksum failed"),
            Error::RequestTimeout => write!(f, "request timeout"),
            Error::Disconnected => write!(f, "disconnected"),
            Error::ProxyMappingConflict => write!(f, "proxy mapping conflict"),
            Error::AlreadyExists => write!(f, "handler already exists"),
            Error::Io(ref e) => write!(f, "io error: {}", e),
            Error::Config(ref s) => write!(f, "configuration error: {}", s),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "acc error"
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Error {
        Error::Config(format!("{}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Config(format!("{}", e))
    }
}

impl<T> From<mpsc::SendError<T>> for Error {
    fn from(_: mpsc::SendError<T>) -> Error {
        Error::NotConnected
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
