//! Proposer side: one prepare/accept/decide round per `run`.
//!
//! The proposer mutex is held across the whole run, network calls included,
//! which serializes concurrent proposals on the same node; `is_running` can
//! block for the duration of an in-flight round.

use crate::acceptor::Acceptor;
use crate::protocol::{AcceptArgs, DecideArgs, Instance, PrepareArgs, ProposalNum};
use crate::transport::PaxosTransport;
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where a test harness asks the proposer to die mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// After the prepare majority, before any accept is sent.
    BeforeAccept,
    /// After the accept majority, before any decide is sent.
    BeforeDecide,
}

struct State {
    my_n: ProposalNum,
    stable: bool,
    crash: Option<CrashPoint>,
}

pub struct Proposer {
    me: String,
    acc: Arc<Acceptor>,
    net: Arc<dyn PaxosTransport>,
    state: Mutex<State>,
}

impl Proposer {
    pub fn new(acc: Arc<Acceptor>, net: Arc<dyn PaxosTransport>, me: &str) -> Self {
        Self {
            me: me.to_string(),
            acc,
            net,
            state: Mutex::new(State {
                my_n: ProposalNum::new(0, me),
                stable: true,
                crash: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while a proposal is in flight.
    pub fn is_running(&self) -> bool {
        !self.state().stable
    }

    /// Arms a crash hook; the next `run` dies at that point, leaving the
    /// proposer unusable like a real crash would.
    pub fn crash_at(&self, point: CrashPoint) {
        self.state().crash = Some(point);
    }

    /// Runs one full round for `instance`, proposing `newv` to `nodes`.
    /// Returns true only when a decision was reached and sent.
    pub fn run(&self, instance: Instance, nodes: &[String], newv: &str) -> bool {
        let mut st = self.state();
        info!(
            "pxs {}: proposing instance {} v={:?} to {:?}",
            self.me, instance, newv, nodes
        );
        if !st.stable {
            warn!("pxs {}: proposer already running", self.me);
            return false;
        }
        st.stable = false;
        st.my_n = ProposalNum::new(st.my_n.n.max(self.acc.n_h().n) + 1, &self.me);

        // prepare phase: collect promises, remember the highest-numbered
        // value any acceptor has already accepted
        let mut prepared = Vec::new();
        let mut v = String::new();
        let mut highest = ProposalNum::default();
        for node in nodes {
            let args = PrepareArgs {
                instance,
                n: st.my_n.clone(),
            };
            match self.net.prepare(node, &self.me, &args) {
                Err(e) => warn!("pxs {}: prepare to {} failed: {}", self.me, node, e),
                Ok(reply) if reply.oldinstance => {
                    // the instance is already decided; adopt and stop
                    self.acc.commit(instance, &reply.v_a);
                    st.stable = true;
                    return false;
                }
                Ok(reply) if reply.accept => {
                    prepared.push(node.clone());
                    if reply.n_a > highest {
                        highest = reply.n_a;
                        v = reply.v_a;
                    }
                }
                Ok(_) => {}
            }
        }
        if !majority(nodes, &prepared) {
            info!("pxs {}: no majority of prepare responses", self.me);
            st.stable = true;
            return false;
        }
        if v.is_empty() {
            v = newv.to_string();
        }
        if st.crash == Some(CrashPoint::BeforeAccept) {
            warn!("pxs {}: dying before the accept phase", self.me);
            return false;
        }

        // accept phase, restricted to the nodes that promised
        let mut accepted = Vec::new();
        for node in &prepared {
            let args = AcceptArgs {
                instance,
                n: st.my_n.clone(),
                v: v.clone(),
            };
            match self.net.accept(node, &self.me, &args) {
                Err(e) => warn!("pxs {}: accept to {} failed: {}", self.me, node, e),
                Ok(true) => accepted.push(node.clone()),
                Ok(false) => {}
            }
        }
        if !majority(nodes, &accepted) {
            info!("pxs {}: no majority of accept responses", self.me);
            st.stable = true;
            return false;
        }
        if st.crash == Some(CrashPoint::BeforeDecide) {
            warn!("pxs {}: dying before the decide phase", self.me);
            return false;
        }

        // decide phase: best effort to everyone who accepted
        for node in &accepted {
            let args = DecideArgs {
                instance,
                v: v.clone(),
            };
            if let Err(e) = self.net.decide(node, &self.me, &args) {
                warn!("pxs {}: decide to {} failed: {}", self.me, node, e);
            }
        }
        st.stable = true;
        true
    }
}

/// True when `subset` contains a majority of `nodes`.
fn majority(nodes: &[String], subset: &[String]) -> bool {
    let count = nodes.iter().filter(|n| subset.contains(n)).count();
    count >= nodes.len() / 2 + 1
}
