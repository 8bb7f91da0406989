//! Transport contract between the proposer and remote acceptors.
//!
//! A full deployment speaks RPC; the protocol only needs these three
//! request/response pairs. Implementations must bound every call (one second
//! per call) and report failures per peer, so the proposer can skip an
//! unreachable peer and let the majority test decide.

use crate::protocol::{AcceptArgs, DecideArgs, PrepareArgs, PrepareReply};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    #[error("call to {0} timed out")]
    Timeout(String),
}

pub trait PaxosTransport: Send + Sync {
    fn prepare(&self, dst: &str, src: &str, args: &PrepareArgs) -> Result<PrepareReply, RpcError>;
    fn accept(&self, dst: &str, src: &str, args: &AcceptArgs) -> Result<bool, RpcError>;
    fn decide(&self, dst: &str, src: &str, args: &DecideArgs) -> Result<(), RpcError>;
}
