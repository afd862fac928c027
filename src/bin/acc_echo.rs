//! Demo binary exercising the core end to end: a listener that echoes
//! every request payload back to its sender, and (optionally, in the
//! same process) a client connection that fires a handful of requests
//! at one. Run with `--listen` in one process and `--connect` in
//! another pointed at the listener's address to see it cross real
//! sockets, or pass both to see both sides in a single process.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;
extern crate acc;

use clap::{App, Arg};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use acc::{AccConfig, Comm, ConnectionShared, Event, EventKind};

static LISTEN_ARG: &'static str = "LISTEN";
static CONNECT_ARG: &'static str = "CONNECT";

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::with_name(LISTEN_ARG)
                .long("listen")
                .takes_value(true)
                .help("Address to listen on and echo requests from, e.g. 127.0.0.1:4000"),
        )
        .arg(
            Arg::with_name(CONNECT_ARG)
                .long("connect")
                .takes_value(true)
                .help("Address to connect to and send a few requests against"),
        )
}

fn main() {
    drop(pretty_env_logger::init());
    let opts = mk_app().get_matches();

    let comm = Arc::new(Comm::new(&AccConfig::default()).expect("could not bring up comm"));

    if let Some(addr) = opts.value_of(LISTEN_ARG) {
        let addr: SocketAddr = addr.parse().expect("invalid --listen address");
        let echo_comm = comm.clone();
        comm.listen(addr, Arc::new(move |event: Event| echo(&echo_comm, event)))
            .expect("could not bind listener");
        info!("listening on {}", addr);
    }

    if let Some(addr) = opts.value_of(CONNECT_ARG) {
        let addr: SocketAddr = addr.parse().expect("invalid --connect address");
        let conn = comm
            .connect(addr, Arc::new(on_client_event))
            .expect("could not connect");
        for i in 0..5u32 {
            let payload = format!("ping {}", i).into_bytes();
            ConnectionShared::send_request(
                &conn,
                0,
                payload,
                Duration::from_secs(5),
                move |event: Event| match event.kind {
                    EventKind::Message => {
                        info!("reply {}: {}", i, String::from_utf8_lossy(&event.payload));
                    }
                    EventKind::Error => {
                        warn!("request {} failed: {:?}", i, event.error);
                    }
                    _ => {}
                },
            )
            .expect("could not send request");
        }
    }

    comm.run();
}

/// The listener's dispatch callback: replies to every request with
/// its own payload, tagged with the request id it arrived with so
/// the sender's request table can match it.
fn echo(comm: &Arc<Comm>, event: Event) {
    match event.kind {
        EventKind::ConnectionEstablished => info!("accepted {}", event.peer),
        EventKind::Message => {
            let request_id = match event.header {
                Some(ref h) if h.is_request() => h.request_id,
                _ => return,
            };
            if let Err(e) = comm.send_response(&event.peer, request_id, event.payload) {
                warn!("could not echo response to {}: {}", event.peer, e);
            }
        }
        EventKind::Disconnect => info!("{} disconnected: {:?}", event.peer, event.error),
        _ => {}
    }
}

fn on_client_event(event: Event) {
    if let EventKind::Disconnect = event.kind {
        warn!("server {} hung up: {:?}", event.peer, event.error);
    }
}
