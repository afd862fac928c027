//! The Handler Map: the core's only mapping from an `Address` to a
//! live connection. Two indexes behind a single lock, per `spec.md`
//! §3.4: `inet -> connection` is authoritative, `proxy -> inet` is a
//! derived alias table, resolved at lookup time rather than
//! materialized into a second copy of the connection table.
//!
//! `std::sync::RwLock` gives many concurrent lookups (one per
//! inbound-event dispatch, one per outbound send) without serializing
//! them behind a single mutex, while still giving `add_proxy`/`remove`
//! exclusive access to both indexes together.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};

use tacho;

use address::Address;
use error::Error;
use event::{ErrorCode, Event};
use handler::ConnectionShared;
use header::{self, ProxyEntry, SELF_MARKER};

struct Inner {
    by_inet: HashMap<(Ipv4Addr, u16), Arc<ConnectionShared>>,
    proxy_to_inet: HashMap<String, (Ipv4Addr, u16)>,
}

/// Accept/close/proxy-mutation counters plus a live-connection gauge,
/// in the teacher's `balancer::endpoints::Metrics` style: a flat
/// struct of `tacho` instruments built once from a `Scope`, updated
/// inline at the call sites that already hold the lock.
struct Metrics {
    connections: tacho::Gauge,
    accepted: tacho::Counter,
    closed: tacho::Counter,
    already_exists: tacho::Counter,
    proxy_updates: tacho::Counter,
    proxy_rebinds: tacho::Counter,
}

impl Metrics {
    fn new(scope: &tacho::Scope) -> Metrics {
        let hm = scope.clone().prefixed("handler_map".into());
        Metrics {
            connections: hm.gauge("connections".into()),
            accepted: hm.counter("accepted".into()),
            closed: hm.counter("closed".into()),
            already_exists: hm.counter("already_exists".into()),
            proxy_updates: hm.counter("proxy_updates".into()),
            proxy_rebinds: hm.counter("proxy_rebinds".into()),
        }
    }
}

pub struct HandlerMap {
    inner: RwLock<Inner>,
    metrics: Metrics,
}

impl HandlerMap {
    pub fn new(scope: tacho::Scope) -> HandlerMap {
        HandlerMap {
            inner: RwLock::new(Inner {
                by_inet: HashMap::new(),
                proxy_to_inet: HashMap::new(),
            }),
            metrics: Metrics::new(&scope),
        }
    }

    /// Registers a newly established connection under its inet
    /// address. Fails with `AlreadyExists` if a live (non-decommissioned)
    /// entry already occupies that address -- the duplicate-connect
    /// case the data-connection state machine must reject.
    pub fn insert(&self, inet: (Ipv4Addr, u16), conn: Arc<ConnectionShared>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.by_inet.get(&inet) {
            if !existing.is_decommissioned() {
                self.metrics.already_exists.incr(1);
                return Err(Error::AlreadyExists);
            }
        }
        inner.by_inet.insert(inet, conn);
        self.metrics.accepted.incr(1);
        self.metrics.connections.set(inner.by_inet.len());
        Ok(())
    }

    /// Resolves an `Address` to its live connection. A `Proxy` name is
    /// translated through the proxy alias table first; an `Inet`
    /// address is looked up directly; `Unset` never resolves.
    pub fn lookup(&self, addr: &Address) -> Option<Arc<ConnectionShared>> {
        let inner = self.inner.read().unwrap();
        match *addr {
            Address::Unset => None,
            Address::Inet(ip, port) => inner.by_inet.get(&(ip, port)).cloned(),
            Address::Proxy(ref name) => inner
                .proxy_to_inet
                .get(name)
                .and_then(|inet| inner.by_inet.get(inet))
                .cloned(),
        }
    }

    /// Associates `name` with `inet`, replacing whatever `name` was
    /// previously bound to. Idempotent if the mapping is unchanged; a
    /// rebind to a *different* inet moves the alias there immediately
    /// -- the prior holder simply stops being reachable under `name`,
    /// it is not itself torn down.
    ///
    /// On success, broadcasts the updated mapping to every connection
    /// currently known to the map -- the core has no notion of
    /// "worker" vs. "master" peers, so every connected endpoint is a
    /// legitimate recipient.
    pub fn add_proxy(&self, name: String, inet: (Ipv4Addr, u16)) -> Result<(), Error> {
        {
            let mut inner = self.inner.write().unwrap();
            match inner.proxy_to_inet.get(&name).cloned() {
                Some(existing) if existing == inet => return Ok(()),
                Some(previous) => {
                    self.metrics.proxy_rebinds.incr(1);
                    if let Some(conn) = inner.by_inet.get(&previous) {
                        let mut proxy = conn.proxy.lock().unwrap();
                        if proxy.as_ref().map(String::as_str) == Some(name.as_str()) {
                            *proxy = None;
                        }
                    }
                }
                None => {}
            }
            if let Some(conn) = inner.by_inet.get(&inet) {
                *conn.proxy.lock().unwrap() = Some(name.clone());
            }
            inner.proxy_to_inet.insert(name.clone(), inet);
        }
        self.metrics.proxy_updates.incr(1);
        self.broadcast_proxy_update(ProxyEntry {
            name,
            addr: inet.0,
            port: inet.1,
        });
        Ok(())
    }

    fn broadcast_proxy_update(&self, entry: ProxyEntry) {
        let inner = self.inner.read().unwrap();
        let mut entries = vec![ProxyEntry {
            name: SELF_MARKER.to_string(),
            addr: entry.addr,
            port: entry.port,
        }];
        entries.push(entry);
        let frame = header::encode_proxy_update(&entries).to_vec();
        for conn in inner.by_inet.values() {
            if conn.is_decommissioned() {
                continue;
            }
            let _ = ConnectionShared::send_framed(conn, 0, header::FLAG_PROXY_UPDATE, 0, frame.clone());
        }
    }

    /// Removes `addr`'s live entry, marking it decommissioned and
    /// synthesizing a terminal `Disconnect` for any requests still
    /// pending against it. Idempotent; a second call for an address
    /// already removed is a no-op.
    pub fn remove(&self, inet: (Ipv4Addr, u16)) {
        let conn = {
            let mut inner = self.inner.write().unwrap();
            let conn = inner.by_inet.remove(&inet);
            self.metrics.connections.set(inner.by_inet.len());
            conn
        };
        if let Some(conn) = conn {
            self.metrics.closed.incr(1);
            conn.decommission();
            let peer = conn.peer.clone();
            let local = conn.local.clone();
            for mut cb in conn.drain_requests() {
                cb(Event::error(peer.clone(), local.clone(), ErrorCode::Disconnected));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_inet.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor::Reactor;

    fn make_conn(reactor: &mut Reactor, peer: Address, local: Address) -> Arc<ConnectionShared> {
        let token = reactor.next_token();
        Arc::new(ConnectionShared::new(peer, local, 4096, reactor.remote(), token))
    }

    #[test]
    fn insert_rejects_live_duplicate() {
        let mut reactor = Reactor::new().unwrap();
        let map = HandlerMap::new(tacho::new().0);
        let inet = (Ipv4Addr::new(10, 0, 0, 1), 100);
        let a = make_conn(&mut reactor, Address::from_inet(inet.0, inet.1), Address::Unset);
        let b = make_conn(&mut reactor, Address::from_inet(inet.0, inet.1), Address::Unset);

        map.insert(inet, a).unwrap();
        match map.insert(inet, b) {
            Err(Error::AlreadyExists) => {}
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn insert_allows_reuse_after_removal() {
        let mut reactor = Reactor::new().unwrap();
        let map = HandlerMap::new(tacho::new().0);
        let inet = (Ipv4Addr::new(10, 0, 0, 2), 100);
        let a = make_conn(&mut reactor, Address::from_inet(inet.0, inet.1), Address::Unset);
        map.insert(inet, a).unwrap();
        map.remove(inet);
        let b = make_conn(&mut reactor, Address::from_inet(inet.0, inet.1), Address::Unset);
        assert!(map.insert(inet, b).is_ok());
    }

    #[test]
    fn proxy_lookup_resolves_through_alias() {
        let mut reactor = Reactor::new().unwrap();
        let map = HandlerMap::new(tacho::new().0);
        let inet = (Ipv4Addr::new(10, 0, 0, 3), 200);
        let conn = make_conn(&mut reactor, Address::from_inet(inet.0, inet.1), Address::Unset);
        map.insert(inet, conn).unwrap();
        map.add_proxy("rs-1".to_string(), inet).unwrap();

        let found = map.lookup(&Address::from_proxy("rs-1"));
        assert!(found.is_some());
    }

    #[test]
    fn add_proxy_rebind_moves_the_alias() {
        let mut reactor = Reactor::new().unwrap();
        let map = HandlerMap::new(tacho::new().0);
        let a = (Ipv4Addr::new(10, 0, 0, 4), 100);
        let b = (Ipv4Addr::new(10, 0, 0, 5), 100);
        let conn_a = make_conn(&mut reactor, Address::from_inet(a.0, a.1), Address::Unset);
        let conn_b = make_conn(&mut reactor, Address::from_inet(b.0, b.1), Address::Unset);
        map.insert(a, conn_a.clone()).unwrap();
        map.insert(b, conn_b.clone()).unwrap();

        map.add_proxy("rs-1".to_string(), a).unwrap();
        assert!(map.lookup(&Address::from_proxy("rs-1")).unwrap().peer == conn_a.peer);

        map.add_proxy("rs-1".to_string(), b).unwrap();
        let resolved = map.lookup(&Address::from_proxy("rs-1")).unwrap();
        assert!(resolved.peer == conn_b.peer);
        assert!(conn_a.proxy.lock().unwrap().is_none());
    }
}
