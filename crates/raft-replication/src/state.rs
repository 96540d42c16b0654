/// Per-follower replication progress (spec §3 `ReplicaState`).
///
/// Invariants: `matchIndex <= nextIndex - 1`; `sendIndex >= nextIndex`; all
/// three are monotonically non-decreasing except on the explicit regression
/// handled in [`crate::Replicator`] on a logical append failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaState {
    pub next_index: u64,
    pub match_index: u64,
    pub send_index: u64,
}

impl ReplicaState {
    /// A freshly elected leader starts a peer's replicator with
    /// `nextIndex = log.lastIndex` (spec §3 "Lifecycle").
    pub fn new(last_log_index: u64) -> Self {
        Self {
            next_index: last_log_index,
            match_index: 0,
            send_index: last_log_index,
        }
    }
}
