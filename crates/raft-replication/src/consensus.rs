use crate::MemberId;

/// The shared consensus state the replication engine observes and, on
/// stepdown, mutates (spec §6 "Consensus state" and §9 "cyclic reference").
///
/// This is a capability handle, not ownership of the Raft state machine: the
/// replication engine never reaches into leader election or membership
/// directly, only through these narrow operations.
pub trait Consensus: Send + Sync + 'static {
    fn current_term(&self) -> u64;

    fn set_current_term(&self, term: u64);

    fn commit_index(&self) -> u64;

    /// Advances the commit index. Only [`crate::ReplicationGroup`] calls this,
    /// after the majority-commit safety rule (spec §4.5) is satisfied. Not
    /// part of the literal external transport/consensus contract, but
    /// required for the in-scope component to do its job.
    fn set_commit_index(&self, index: u64);

    fn set_leader(&self, leader: Option<MemberId>);

    fn next_correlation_id(&self) -> u64;

    fn local_member(&self) -> MemberId;

    /// Stepdown: observed a higher term than our own.
    fn transition_to_follower(&self, term: u64);
}
