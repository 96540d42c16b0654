//! Leader-side replication engine for a Raft-family consensus kernel (see
//! `SPEC_FULL.md`): per-follower pipelined `AppendEntries`, progress
//! tracking, and majority-commit resolution across the cluster.

mod consensus;
mod error;
mod group;
mod log_reader;
mod replicator;
mod state;
mod transport;

pub use consensus::Consensus;
pub use error::{Error, Result};
pub use group::ReplicationGroup;
pub use log_reader::{LogReader, SharedLog};
pub use replicator::ReplicatorHandle;
pub use state::ReplicaState;
pub use transport::{AppendEntriesRequest, AppendEntriesResponse, CorrelationId, Transport};

/// Cluster member identity. The spec leaves membership representation to
/// the (out-of-scope) membership store; a bare integer id is enough for the
/// replication engine, which only ever uses it as a map key and a transport
/// addressing token.
pub type MemberId = u64;
