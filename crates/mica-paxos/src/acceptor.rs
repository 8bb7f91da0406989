//! Acceptor side of the protocol.
//!
//! All handlers run under one mutex. A decided instance resets the round
//! state and fires the configuration-change upcall with the mutex released,
//! so the upcall may re-enter the acceptor.

use crate::journal::AcceptorLog;
use crate::protocol::{AcceptArgs, DecideArgs, Instance, PrepareArgs, PrepareReply, ProposalNum};
use log::{error, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Upcall fired once per decided instance, with the acceptor mutex released.
pub trait ConfigChange: Send + Sync {
    fn paxos_commit(&self, instance: Instance, value: &str);
}

struct State {
    instance_h: Instance,
    values: HashMap<Instance, String>,
    n_h: ProposalNum,
    n_a: ProposalNum,
    v_a: String,
    log: AcceptorLog,
}

pub struct Acceptor {
    me: String,
    cfg: Option<Arc<dyn ConfigChange>>,
    state: Mutex<State>,
}

impl Acceptor {
    /// Opens a fresh acceptor. The first node of a new cluster passes
    /// `first = true` and seeds instance 1 with the initial view `value`.
    pub fn new<P: AsRef<Path>>(
        cfg: Option<Arc<dyn ConfigChange>>,
        first: bool,
        me: &str,
        value: &str,
        log_path: P,
    ) -> std::io::Result<Self> {
        let mut state = State {
            instance_h: 0,
            values: HashMap::new(),
            n_h: ProposalNum::new(0, me),
            n_a: ProposalNum::new(0, me),
            v_a: String::new(),
            log: AcceptorLog::open(log_path)?,
        };
        if first {
            state.values.insert(1, value.to_string());
            state.log.instance(1, value)?;
            state.instance_h = 1;
        }
        Ok(Self {
            me: me.to_string(),
            cfg,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn prepare(&self, _src: &str, args: &PrepareArgs) -> PrepareReply {
        let mut st = self.state();
        if args.instance <= st.instance_h {
            // already decided; hand the proposer the decided value
            PrepareReply {
                accept: false,
                oldinstance: true,
                n_a: ProposalNum::default(),
                v_a: st.values.get(&args.instance).cloned().unwrap_or_default(),
            }
        } else if args.n > st.n_h {
            st.n_h = args.n.clone();
            let promised = st.n_h.clone();
            if let Err(e) = st.log.prop(&promised) {
                error!("pxs {}: journal write failed: {}", self.me, e);
            }
            PrepareReply {
                accept: true,
                oldinstance: false,
                n_a: st.n_a.clone(),
                v_a: st.v_a.clone(),
            }
        } else {
            PrepareReply {
                accept: false,
                oldinstance: false,
                ..Default::default()
            }
        }
    }

    pub fn accept(&self, _src: &str, args: &AcceptArgs) -> bool {
        let mut st = self.state();
        if args.n >= st.n_h {
            st.n_a = args.n.clone();
            st.v_a = args.v.clone();
            let (n_a, v_a) = (st.n_a.clone(), st.v_a.clone());
            if let Err(e) = st.log.accept(&n_a, &v_a) {
                error!("pxs {}: journal write failed: {}", self.me, e);
            }
            true
        } else {
            false
        }
    }

    /// Applies a decide. A decide for an instance this replica has not even
    /// accepted yet means it missed a decision; that gap is fatal by design.
    pub fn decide(&self, _src: &str, args: &DecideArgs) {
        let mut st = self.state();
        info!(
            "pxs {}: decide for instance {} (instance_h {})",
            self.me, args.instance, st.instance_h
        );
        if args.instance == st.instance_h + 1 {
            assert_eq!(
                st.v_a, args.v,
                "pxs {}: decide value differs from accepted value",
                self.me
            );
            let value = st.v_a.clone();
            let fired = self.commit_locked(&mut st, args.instance, &value);
            drop(st);
            if fired {
                self.upcall(args.instance, &value);
            }
        } else if args.instance <= st.instance_h {
            // already decided; ignore
        } else {
            panic!(
                "pxs {}: decide for future instance {} with instance_h {}",
                self.me, args.instance, st.instance_h
            );
        }
    }

    /// Records a decided value learned out of band (an oldinstance reply).
    pub fn commit(&self, instance: Instance, value: &str) {
        let mut st = self.state();
        let fired = self.commit_locked(&mut st, instance, value);
        drop(st);
        if fired {
            self.upcall(instance, value);
        }
    }

    fn commit_locked(&self, st: &mut State, instance: Instance, value: &str) -> bool {
        if instance <= st.instance_h {
            return false;
        }
        info!("pxs {}: instance {} decided, v={}", self.me, instance, value);
        st.values.insert(instance, value.to_string());
        if let Err(e) = st.log.instance(instance, value) {
            error!("pxs {}: journal write failed: {}", self.me, e);
        }
        st.instance_h = instance;
        st.n_h = ProposalNum::new(0, &self.me);
        st.n_a = ProposalNum::new(0, &self.me);
        st.v_a.clear();
        true
    }

    fn upcall(&self, instance: Instance, value: &str) {
        if let Some(cfg) = &self.cfg {
            cfg.paxos_commit(instance, value);
        }
    }

    pub fn n_h(&self) -> ProposalNum {
        self.state().n_h.clone()
    }

    pub fn instance_h(&self) -> Instance {
        self.state().instance_h
    }

    pub fn value(&self, instance: Instance) -> Option<String> {
        self.state().values.get(&instance).cloned()
    }

    /// Journal contents for transfer to a recovering replica.
    pub fn dump(&self) -> std::io::Result<String> {
        self.state().log.dump()
    }

    /// Replaces the journal and rebuilds in-memory state from it.
    pub fn restore(&self, data: &str) -> std::io::Result<()> {
        let mut st = self.state();
        let restored = st.log.restore(data)?;
        st.instance_h = restored.instance_h;
        st.values = restored.values;
        st.n_h = restored.n_h;
        st.n_a = restored.n_a;
        st.v_a = restored.v_a;
        Ok(())
    }
}
