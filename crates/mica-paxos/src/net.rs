//! In-memory transport for the test harness: direct calls between
//! registered acceptors over links that can be cut and healed.

use crate::acceptor::Acceptor;
use crate::protocol::{AcceptArgs, DecideArgs, PrepareArgs, PrepareReply};
use crate::transport::{PaxosTransport, RpcError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MemoryNetwork {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Arc<Acceptor>>,
    cut: HashSet<(String, String)>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, acceptor: Arc<Acceptor>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.nodes.insert(name.to_string(), acceptor);
    }

    /// Removes a node entirely, as if its process died.
    pub fn unregister(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.nodes.remove(name);
    }

    /// Cuts both directions between `a` and `b`.
    pub fn partition(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cut.insert((a.to_string(), b.to_string()));
        inner.cut.insert((b.to_string(), a.to_string()));
    }

    pub fn heal(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cut.remove(&(a.to_string(), b.to_string()));
        inner.cut.remove(&(b.to_string(), a.to_string()));
    }

    fn route(&self, src: &str, dst: &str) -> Result<Arc<Acceptor>, RpcError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.cut.contains(&(src.to_string(), dst.to_string())) {
            return Err(RpcError::Timeout(dst.to_string()));
        }
        inner
            .nodes
            .get(dst)
            .cloned()
            .ok_or_else(|| RpcError::Unreachable(dst.to_string()))
    }
}

impl PaxosTransport for MemoryNetwork {
    fn prepare(&self, dst: &str, src: &str, args: &PrepareArgs) -> Result<PrepareReply, RpcError> {
        Ok(self.route(src, dst)?.prepare(src, args))
    }

    fn accept(&self, dst: &str, src: &str, args: &AcceptArgs) -> Result<bool, RpcError> {
        Ok(self.route(src, dst)?.accept(src, args))
    }

    fn decide(&self, dst: &str, src: &str, args: &DecideArgs) -> Result<(), RpcError> {
        self.route(src, dst)?.decide(src, args);
        Ok(())
    }
}
