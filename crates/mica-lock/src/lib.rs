//! Blocking lock service: per-id mutual exclusion for cooperating clients.
//!
//! One server-wide mutex guards a held set and a table of per-id condition
//! variables. `acquire` parks the caller on its id's condvar until the id
//! leaves the held set; `release` wakes a single waiter. Ownership is not
//! tracked per client: any client may release any held lock (the clients
//! cooperate by construction), and a release of a lock nobody holds is the
//! only error the server reports.

use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use thiserror::Error;

pub type LockId = u64;
pub type ClientId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("no such lock")]
    NoEnt,
}

#[derive(Default)]
struct State {
    held: HashSet<LockId>,
    conds: HashMap<LockId, Arc<Condvar>>,
    nacquire: u64,
}

#[derive(Default)]
pub struct LockServer {
    state: Mutex<State>,
}

impl LockServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until `lid` is free, then marks it held by the caller.
    pub fn acquire(&self, clt: ClientId, lid: LockId) {
        let mut st = self.state();
        while st.held.contains(&lid) {
            let cond = st.conds.entry(lid).or_default().clone();
            st = cond.wait(st).unwrap_or_else(|e| e.into_inner());
        }
        st.held.insert(lid);
        st.conds.entry(lid).or_default();
        st.nacquire += 1;
        debug!("ls: client {} acquired lock {}", clt, lid);
    }

    /// Releases `lid` and wakes one waiter, if any.
    pub fn release(&self, clt: ClientId, lid: LockId) -> Result<(), LockError> {
        let mut st = self.state();
        if !st.held.remove(&lid) {
            warn!("ls: client {} released lock {} nobody holds", clt, lid);
            return Err(LockError::NoEnt);
        }
        debug!("ls: client {} released lock {}", clt, lid);
        if let Some(cond) = st.conds.get(&lid) {
            cond.notify_one();
            // drop the condvar once nobody is parked on it
            if Arc::strong_count(cond) == 1 {
                st.conds.remove(&lid);
            }
        }
        Ok(())
    }

    /// Informational counter of successful acquires.
    pub fn stat(&self, clt: ClientId, lid: LockId) -> u64 {
        let st = self.state();
        debug!("ls: stat request from client {} for lock {}", clt, lid);
        st.nacquire
    }
}

/// Cheap handle a client uses to reach the shared server.
#[derive(Clone)]
pub struct LockClient {
    server: Arc<LockServer>,
    clt: ClientId,
}

impl LockClient {
    pub fn new(server: Arc<LockServer>, clt: ClientId) -> Self {
        Self { server, clt }
    }

    pub fn acquire(&self, lid: LockId) {
        self.server.acquire(self.clt, lid);
    }

    pub fn release(&self, lid: LockId) {
        if let Err(e) = self.server.release(self.clt, lid) {
            warn!("lc: release of lock {}: {}", lid, e);
        }
    }

    pub fn stat(&self, lid: LockId) -> u64 {
        self.server.stat(self.clt, lid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release_and_stat() {
        let ls = LockServer::new();
        ls.acquire(1, 42);
        ls.release(1, 42).unwrap();
        ls.acquire(1, 42);
        ls.release(1, 42).unwrap();
        assert_eq!(ls.stat(1, 42), 2);
    }

    #[test]
    fn release_of_unheld_lock_is_noent() {
        let ls = LockServer::new();
        assert_eq!(ls.release(1, 7), Err(LockError::NoEnt));
        ls.acquire(1, 7);
        // clients are not distinguished: another client may release
        assert_eq!(ls.release(2, 7), Ok(()));
        assert_eq!(ls.release(2, 7), Err(LockError::NoEnt));
    }

    #[test]
    fn contending_threads_are_mutually_excluded() {
        let ls = Arc::new(LockServer::new());
        let shared = Arc::new(AtomicU64::new(0));
        const THREADS: u32 = 8;
        const ROUNDS: u64 = 200;

        let mut handles = Vec::new();
        for clt in 0..THREADS {
            let ls = ls.clone();
            let shared = shared.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..ROUNDS {
                    ls.acquire(clt, 1);
                    // plain read-modify-write: only the lock keeps it atomic
                    let seen = shared.load(Ordering::Relaxed);
                    thread::yield_now();
                    shared.store(seen + 1, Ordering::Relaxed);
                    ls.release(clt, 1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.load(Ordering::Relaxed), u64::from(THREADS) * ROUNDS);
        assert_eq!(ls.stat(0, 1), u64::from(THREADS) * ROUNDS);
    }

    #[test]
    fn one_release_wakes_at_most_one_waiter() {
        let ls = Arc::new(LockServer::new());
        let acquired = Arc::new(AtomicU64::new(0));
        ls.acquire(0, 9);

        let mut handles = Vec::new();
        for clt in 1..=2 {
            let ls = ls.clone();
            let acquired = acquired.clone();
            handles.push(thread::spawn(move || {
                ls.acquire(clt, 9);
                acquired.fetch_add(1, Ordering::SeqCst);
            }));
        }

        thread::sleep(Duration::from_millis(100));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        ls.release(0, 9).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);

        ls.release(0, 9).unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acquired.load(Ordering::SeqCst), 2);
        ls.release(0, 9).unwrap();
    }

    #[test]
    fn independent_lock_ids_do_not_interfere() {
        let ls = Arc::new(LockServer::new());
        ls.acquire(1, 100);
        // a different id must not block
        let ls2 = ls.clone();
        let handle = thread::spawn(move || {
            ls2.acquire(2, 200);
            ls2.release(2, 200).unwrap();
        });
        handle.join().unwrap();
        ls.release(1, 100).unwrap();
    }
}
