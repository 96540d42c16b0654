use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;

use crate::{
    consensus::Consensus,
    error::{Error, Result},
    log_reader::LogReader,
    replicator::ReplicatorHandle,
    transport::Transport,
    MemberId,
};

/// Fan-out across followers and majority-commit resolution (spec §4.5).
///
/// Each member's `matchIndex` is observed through the callback every
/// [`ReplicatorHandle`] is spawned with; `ReplicationGroup` never reaches
/// into a replicator's private state directly.
pub struct ReplicationGroup<T, C> {
    transport: Arc<T>,
    consensus: Arc<C>,
    log: Arc<dyn LogReader>,
    members: Mutex<HashMap<MemberId, ReplicatorHandle>>,
    match_table: Arc<Mutex<HashMap<MemberId, u64>>>,
    commit_watch: watch::Sender<u64>,
}

impl<T: Transport, C: Consensus> ReplicationGroup<T, C> {
    pub fn new(transport: Arc<T>, consensus: Arc<C>, log: Arc<dyn LogReader>) -> Self {
        let (commit_watch, _) = watch::channel(consensus.commit_index());
        Self {
            transport,
            consensus,
            log,
            members: Mutex::new(HashMap::new()),
            match_table: Arc::new(Mutex::new(HashMap::new())),
            commit_watch,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len() + 1 // + leader
    }

    fn majority(&self) -> usize {
        self.member_count() / 2 + 1
    }

    /// Adds a peer and starts replicating to it (spec §4.5 "Peer set is
    /// read at leader-open; membership changes ... cause Replicator
    /// add/remove").
    pub async fn add_member(&self, peer: MemberId) -> Result<()> {
        let match_table = self.match_table.clone();
        let consensus = self.consensus.clone();
        let log = self.log.clone();
        let on_match_advance: Arc<dyn Fn(MemberId, u64) + Send + Sync> = {
            let commit_watch = self.commit_watch.clone();
            Arc::new(move |member, matched| {
                let mut table = match_table.lock().unwrap();
                table.insert(member, matched);
                let mut matches: Vec<u64> = table.values().copied().collect();
                matches.push(log.last_index());
                matches.sort_unstable_by(|a, b| b.cmp(a));
                let n = matches.len();
                let majority_index = matches[n / 2];
                if majority_index > *commit_watch.borrow() {
                    let current_term = consensus.current_term();
                    let committable = matches!(log.get(majority_index), Ok(Some(entry)) if entry.term == current_term);
                    if committable {
                        consensus.set_commit_index(majority_index);
                        let _ = commit_watch.send(majority_index);
                    }
                }
            })
        };

        let last_log_index = self.log.last_index();
        let handle = ReplicatorHandle::spawn(
            peer,
            self.transport.clone(),
            self.consensus.clone(),
            self.log.clone(),
            last_log_index,
            Some(on_match_advance),
        )
        .await?;

        self.match_table.lock().unwrap().insert(peer, 0);
        self.members.lock().unwrap().insert(peer, handle);
        Ok(())
    }

    pub fn remove_member(&self, peer: MemberId) {
        if let Some(handle) = self.members.lock().unwrap().remove(&peer) {
            handle.close();
        }
        self.match_table.lock().unwrap().remove(&peer);
    }

    /// Resolves once a majority (including the leader) have replicated past
    /// `index` and the entry at `index` carries the current term (spec §4.5
    /// majority-commit safety rule).
    pub async fn commit(&self, index: u64) -> Result<u64> {
        if index <= *self.commit_watch.borrow() {
            return Ok(index);
        }
        let mut rx = self.commit_watch.subscribe();
        // Kick every lagging peer so the majority actually advances.
        for handle in self.members.lock().unwrap().values() {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _ = handle.commit(index).await;
            });
        }
        loop {
            if *rx.borrow() >= index {
                return Ok(index);
            }
            rx.changed().await.map_err(|_| Error::Closed)?;
        }
    }

    /// Broadcasts a heartbeat to every member; resolves once a majority
    /// answer successfully (spec §4.5 `ping()`).
    pub async fn ping(&self) -> Result<()> {
        let handles: Vec<ReplicatorHandle> = self.members.lock().unwrap().values().cloned().collect();
        let results = futures::future::join_all(handles.iter().map(|h| h.ping())).await;
        let successes = results.iter().filter(|r| r.is_ok()).count() + 1; // leader counts itself
        if successes >= self.majority() {
            Ok(())
        } else {
            Err(Error::TransportError("heartbeat did not reach a majority".into()))
        }
    }

    pub fn commit_index(&self) -> u64 {
        *self.commit_watch.borrow()
    }
}
