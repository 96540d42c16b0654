use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use raft_log::{Entry, EntryType};
use raft_replication::{
    AppendEntriesRequest, AppendEntriesResponse, Consensus, LogReader, MemberId, Result, Transport,
};

/// An in-memory log good enough to drive the replication engine without
/// touching the filesystem: tests only need `get`/`last_index`.
#[derive(Default)]
pub struct TestLog {
    entries: Mutex<Vec<Entry>>,
}

impl TestLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn append(&self, term: u64, entry_type: EntryType) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.len() as u64 + 1;
        entries.push(Entry::new(index, term, entry_type, format!("v{index}").into_bytes()));
        index
    }

    pub fn append_many(&self, count: u64, term: u64) {
        for _ in 0..count {
            self.append(term, EntryType::Normal);
        }
    }
}

impl LogReader for TestLog {
    fn get(&self, index: u64) -> raft_log::Result<Option<Entry>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self.entries.lock().unwrap().get(index as usize - 1).cloned())
    }

    fn last_index(&self) -> u64 {
        self.entries.lock().unwrap().len() as u64
    }
}

/// An atomics-backed [`Consensus`] good enough for single-process tests.
pub struct TestConsensus {
    term: AtomicU64,
    commit_index: AtomicU64,
    leader: Mutex<Option<MemberId>>,
    correlation: AtomicU64,
    local: MemberId,
    stepped_down: AtomicU64,
}

impl TestConsensus {
    pub fn new(local: MemberId, term: u64) -> Arc<Self> {
        Arc::new(Self {
            term: AtomicU64::new(term),
            commit_index: AtomicU64::new(0),
            leader: Mutex::new(Some(local)),
            correlation: AtomicU64::new(0),
            local,
            stepped_down: AtomicU64::new(0),
        })
    }

    pub fn stepped_down(&self) -> bool {
        self.stepped_down.load(Ordering::SeqCst) != 0
    }
}

impl Consensus for TestConsensus {
    fn current_term(&self) -> u64 {
        self.term.load(Ordering::SeqCst)
    }

    fn set_current_term(&self, term: u64) {
        self.term.store(term, Ordering::SeqCst);
    }

    fn commit_index(&self) -> u64 {
        self.commit_index.load(Ordering::SeqCst)
    }

    fn set_commit_index(&self, index: u64) {
        self.commit_index.fetch_max(index, Ordering::SeqCst);
    }

    fn set_leader(&self, leader: Option<MemberId>) {
        *self.leader.lock().unwrap() = leader;
    }

    fn next_correlation_id(&self) -> u64 {
        self.correlation.fetch_add(1, Ordering::SeqCst)
    }

    fn local_member(&self) -> MemberId {
        self.local
    }

    fn transition_to_follower(&self, _term: u64) {
        self.stepped_down.store(1, Ordering::SeqCst);
    }
}

/// A follower simulator used as both the [`Transport`] and the scripted
/// peer state for a single target.
pub struct FakeFollower {
    /// Number of entries the follower's log currently holds.
    log_len: AtomicU64,
    /// If `Some`, the very next response reports this term and fails,
    /// simulating a follower that has seen a newer leader (S6).
    higher_term_once: Mutex<Option<u64>>,
    pub requests: Mutex<Vec<AppendEntriesRequest>>,
}

impl FakeFollower {
    pub fn new(initial_log_len: u64) -> Arc<Self> {
        Arc::new(Self {
            log_len: AtomicU64::new(initial_log_len),
            higher_term_once: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn arm_higher_term(&self, term: u64) {
        *self.higher_term_once.lock().unwrap() = Some(term);
    }

    pub fn log_len(&self) -> u64 {
        self.log_len.load(Ordering::SeqCst)
    }
}

impl FakeFollower {
    async fn handle(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(term) = self.higher_term_once.lock().unwrap().take() {
            return AppendEntriesResponse {
                term,
                succeeded: false,
                last_log_index: self.log_len(),
            };
        }

        let current_len = self.log_len();
        if request.prev_log_index > current_len {
            return AppendEntriesResponse {
                term: request.term,
                succeeded: false,
                last_log_index: current_len,
            };
        }

        let new_len = request.prev_log_index + request.entries.len() as u64;
        self.log_len.store(new_len, Ordering::SeqCst);
        AppendEntriesResponse {
            term: request.term,
            succeeded: true,
            last_log_index: new_len,
        }
    }
}

#[async_trait]
impl Transport for FakeFollower {
    async fn connect(&self, _target: MemberId) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _target: MemberId) {}

    async fn append_entries(&self, _target: MemberId, request: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        Ok(self.handle(request).await)
    }
}

/// Routes `append_entries` to one [`FakeFollower`] per target, so a single
/// [`ReplicationGroup`](raft_replication::ReplicationGroup) can drive
/// several independently scripted peers.
#[derive(Default)]
pub struct FakeCluster {
    followers: Mutex<HashMap<MemberId, Arc<FakeFollower>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, peer: MemberId, follower: Arc<FakeFollower>) {
        self.followers.lock().unwrap().insert(peer, follower);
    }

    pub fn follower(&self, peer: MemberId) -> Arc<FakeFollower> {
        self.followers.lock().unwrap().get(&peer).unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeCluster {
    async fn connect(&self, _target: MemberId) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _target: MemberId) {}

    async fn append_entries(&self, target: MemberId, request: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        let follower = self.follower(target);
        Ok(follower.handle(request).await)
    }
}
