//! Single-decree Paxos per instance, in the shape of "Paxos Made Simple":
//! a proposer drives one prepare/accept/decide round at a time, acceptors
//! promise and accept under a single mutex, and each decided instance fires
//! a configuration-change upcall. The cluster uses it to agree on view
//! changes; the decided value of an instance never differs between nodes.

pub mod acceptor;
pub mod journal;
pub mod net;
pub mod proposer;
pub mod protocol;
pub mod transport;

pub use acceptor::{Acceptor, ConfigChange};
pub use journal::AcceptorLog;
pub use net::MemoryNetwork;
pub use proposer::{CrashPoint, Proposer};
pub use protocol::{AcceptArgs, DecideArgs, Instance, PrepareArgs, PrepareReply, ProposalNum};
pub use transport::{PaxosTransport, RpcError};
