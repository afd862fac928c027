//! A fixed-size set of `Reactor`s plus a round-robin-at-registration
//! assignment policy. Operations on a given socket are pinned to
//! exactly one `Reactor` for the socket's lifetime by hashing the
//! socket's file descriptor once, at registration time.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::io;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use reactor::{Reactor, Remote};

/// One member of the pool: a `Remote` handle to submit work to the
/// reactor thread, plus the join handle used to wait for it to exit.
/// The handle sits behind a `Mutex<Option<_>>` rather than being owned
/// outright so that joining can go through `&self` -- `ReactorPool` is
/// held as `Arc<ReactorPool>` by `Comm`, which only ever hands out
/// shared references.
struct Worker {
    remote: Remote,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Owns `size` reactor threads and hands out `Remote`s pinned by a
/// stable hash of the caller-supplied key (typically the socket's raw
/// file descriptor).
pub struct ReactorPool {
    workers: Vec<Worker>,
}

impl ReactorPool {
    /// Spawns `size` reactor threads, each driven by `run` until its
    /// `Reactor::stop` is called.
    pub fn new(size: usize) -> io::Result<ReactorPool> {
        assert!(size > 0, "reactor pool must have at least one reactor");
        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let (ready_tx, ready_rx) = mpsc::channel();
            let join = thread::Builder::new()
                .name(format!("acc-reactor-{}", n))
                .spawn(move || {
                    let mut reactor = match Reactor::new() {
                        Ok(r) => r,
                        Err(e) => {
                            error!("failed to construct reactor {}: {}", n, e);
                            return;
                        }
                    };
                    let _ = ready_tx.send(reactor.remote());
                    while reactor.is_running() {
                        if let Err(e) = reactor.poll_once(None) {
                            error!("reactor {} poll failed: {}", n, e);
                            break;
                        }
                    }
                })
                .expect("failed to spawn reactor thread");
            let remote = ready_rx
                .recv()
                .expect("reactor thread exited before becoming ready");
            workers.push(Worker {
                remote,
                join: Mutex::new(Some(join)),
            });
        }
        Ok(ReactorPool { workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Selects the reactor that a socket identified by `key` (its raw
    /// file descriptor) is pinned to.
    pub fn select(&self, key: usize) -> Remote {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.workers.len();
        self.workers[idx].remote.clone()
    }

    /// The first reactor, used for work that must run somewhere but
    /// has no natural affinity (e.g. a process-wide timer).
    pub fn any(&self) -> Remote {
        self.workers[0].remote.clone()
    }

    /// A handle to every reactor in the pool, for broadcast operations
    /// like shutdown.
    pub fn all(&self) -> Vec<Remote> {
        self.workers.iter().map(|w| w.remote.clone()).collect()
    }

    /// Blocks until every reactor thread has exited -- callers are
    /// expected to have already told each one to stop (e.g. via
    /// `Remote::stop`). Takes each `JoinHandle` out from behind its
    /// mutex before joining, so this can run concurrently with
    /// `select`/`any`/`all` on the same shared pool; each worker is
    /// joined at most once, since a second call finds `None` left
    /// behind by the first.
    pub fn join_all(&self) {
        for w in &self.workers {
            let handle = w.join.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }
}
