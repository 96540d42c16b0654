use async_trait::async_trait;
use raft_log::Entry;

use crate::{error::Result, MemberId};

pub type CorrelationId = u64;

/// `appendEntries` request (spec §6 "Transport client").
#[derive(Debug, Clone)]
pub struct AppendEntriesRequest {
    pub correlation_id: CorrelationId,
    pub term: u64,
    pub leader: MemberId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

/// `appendEntries` response.
#[derive(Debug, Clone)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub succeeded: bool,
    pub last_log_index: u64,
}

/// The transport client consumed by [`crate::Replicator`] (spec §6).
///
/// Implementations own the actual RPC plumbing (gRPC, a homegrown framed
/// protocol, in-process channels for tests); the replication engine only
/// ever sees this trait.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, target: MemberId) -> Result<()>;

    async fn close(&self, target: MemberId);

    async fn append_entries(
        &self,
        target: MemberId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}
