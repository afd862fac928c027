#[macro_use]
extern crate log;
extern crate bytes;
extern crate crc;
extern crate mio;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tacho;

pub mod address;
pub mod comm;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod handler_map;
pub mod header;
pub mod reactor;

pub use address::Address;
pub use comm::{Callback, Comm};
pub use config::AccConfig;
pub use error::{Error, Result};
pub use event::{ErrorCode, Event, EventKind};
pub use handler::ConnectionShared;
pub use handler_map::HandlerMap;
