//! Configuration for a `Comm` instance. Mirrors the teacher's
//! dispatch-on-first-byte YAML-or-JSON loader rather than adding a
//! third config format.

use serde_json;
use serde_yaml;
use std::io;

/// Parses `txt` as configuration, guessing the format from its first
/// non-whitespace byte: `{` means JSON, anything else is tried as
/// YAML.
pub fn from_str(mut txt: &str) -> io::Result<AccConfig> {
    txt = txt.trim_left();
    if txt.starts_with('{') {
        serde_json::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    } else {
        serde_yaml::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AccConfig {
    /// Number of reactor threads in the pool. `spec.md` §5 calls for
    /// several parallel reactor workers, not one global event loop.
    #[serde(default = "default_reactors")]
    pub reactors: usize,

    /// Number of dispatch-pool worker threads executing application
    /// callbacks, kept off the reactor threads.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-connection send queue capacity in bytes before
    /// `SendQueueFull` is returned. Defaults to the spec's 4 MiB.
    #[serde(default = "default_send_queue_bytes")]
    pub send_queue_bytes: usize,

    /// Milliseconds to wait for a non-blocking `connect` to complete
    /// before treating the peer as unreachable.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Disables Nagle's algorithm on newly established data
    /// connections.
    #[serde(default = "default_tcp_no_delay")]
    pub tcp_no_delay: bool,

    /// Requests edge-triggered readiness notifications where the
    /// platform multiplexer supports them. `mio::PollOpt::edge()` is
    /// always used by the reactor regardless; this flag is carried
    /// for parity with the original configuration surface and for
    /// callers that want to assert the deployment's expectations.
    #[serde(default = "default_epoll_edge_triggered")]
    pub epoll_edge_triggered: bool,

    /// Where proxy-name-to-address mappings originate: `"manual"`
    /// means only explicit `add_proxy` calls populate the Handler
    /// Map's alias table; `"peer"` additionally accepts proxy-update
    /// frames received from connections.
    #[serde(default = "default_proxy_source")]
    pub proxy_source: ProxySource,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxySource {
    Manual,
    Peer,
}

fn default_reactors() -> usize {
    2
}
fn default_workers() -> usize {
    4
}
fn default_send_queue_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_tcp_no_delay() -> bool {
    true
}
fn default_epoll_edge_triggered() -> bool {
    true
}
fn default_proxy_source() -> ProxySource {
    ProxySource::Manual
}

impl Default for AccConfig {
    fn default() -> AccConfig {
        AccConfig {
            reactors: default_reactors(),
            workers: default_workers(),
            send_queue_bytes: default_send_queue_bytes(),
            connect_timeout_ms: default_connect_timeout_ms(),
            tcp_no_delay: default_tcp_no_delay(),
            epoll_edge_triggered: default_epoll_edge_triggered(),
            proxy_source: default_proxy_source(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_yaml_fills_defaults() {
        let yaml = "reactors: 4\nworkers: 8\n";
        let cfg = from_str(yaml).unwrap();
        assert_eq!(cfg.reactors, 4);
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.send_queue_bytes, 4 * 1024 * 1024);
        assert_eq!(cfg.proxy_source, ProxySource::Manual);
    }

    #[test]
    fn parse_json() {
        let json = r#"{"reactors": 3, "workers": 2, "proxy_source": "peer"}"#;
        let cfg = from_str(json).unwrap();
        assert_eq!(cfg.reactors, 3);
        assert_eq!(cfg.proxy_source, ProxySource::Peer);
    }

    #[test]
    fn empty_config_uses_all_defaults() {
        let cfg = from_str("{}").unwrap();
        assert_eq!(cfg.reactors, default_reactors());
        assert_eq!(cfg.connect_timeout_ms, default_connect_timeout_ms());
    }
}
