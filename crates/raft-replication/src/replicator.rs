use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::{
    consensus::Consensus,
    error::{Error, Result},
    log_reader::LogReader,
    state::ReplicaState,
    transport::{AppendEntriesRequest, AppendEntriesResponse, Transport},
    MemberId,
};

/// Spec §4.4: `drive()` never asks the log for more than this many entries
/// in one `AppendEntries` request.
const BATCH_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Ping,
    Append,
}

enum Event {
    Ping(oneshot::Sender<Result<u64>>),
    Commit(u64, oneshot::Sender<Result<u64>>),
    Close,
    Responded(Kind, u64, u64, std::result::Result<AppendEntriesResponse, Error>),
}

/// A handle to a running per-follower replicator. Cloning shares the same
/// underlying actor; dropping every handle does not stop it — call
/// [`Self::close`] explicitly (spec §4.4 "On close()").
#[derive(Clone)]
pub struct ReplicatorHandle {
    peer: MemberId,
    tx: mpsc::UnboundedSender<Event>,
}

impl ReplicatorHandle {
    /// Connects to `peer` and spawns its replication actor. On a transport
    /// connect failure the replicator is never spawned and every later
    /// operation against the (non-existent) handle would simply see a
    /// closed channel; callers should treat a `connect` failure as
    /// `NotOpen` (spec §4.4 "On open()").
    pub async fn spawn<T, C>(
        peer: MemberId,
        transport: Arc<T>,
        consensus: Arc<C>,
        log: Arc<dyn LogReader>,
        last_log_index: u64,
        on_match_advance: Option<Arc<dyn Fn(MemberId, u64) + Send + Sync>>,
    ) -> Result<Self>
    where
        T: Transport,
        C: Consensus,
    {
        transport.connect(peer).await.map_err(|_| Error::NotOpen)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let core = Core {
            peer,
            transport,
            consensus,
            log,
            state: ReplicaState::new(last_log_index),
            ping_in_flight: false,
            append_in_flight: None,
            closed: false,
            pending_pings: Vec::new(),
            pending_commits: BTreeMap::new(),
            on_match_advance,
            self_tx: tx.clone(),
        };
        tokio::spawn(core.run(rx));
        Ok(Self { peer, tx })
    }

    pub fn peer(&self) -> MemberId {
        self.peer
    }

    /// Returns a future of the observed `matchIndex` after the next
    /// successful heartbeat (spec §4.4 "Ping semantics").
    pub async fn ping(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Event::Ping(tx)).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Returns a future that resolves once `matchIndex >= index` (spec §4.4
    /// "Commit futures").
    pub async fn commit(&self, index: u64) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Event::Commit(index, tx)).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    pub fn close(&self) {
        let _ = self.tx.send(Event::Close);
    }
}

struct Core<T, C> {
    peer: MemberId,
    transport: Arc<T>,
    consensus: Arc<C>,
    log: Arc<dyn LogReader>,
    state: ReplicaState,
    ping_in_flight: bool,
    append_in_flight: Option<(u64, u64)>,
    closed: bool,
    pending_pings: Vec<oneshot::Sender<Result<u64>>>,
    pending_commits: BTreeMap<u64, Vec<oneshot::Sender<Result<u64>>>>,
    on_match_advance: Option<Arc<dyn Fn(MemberId, u64) + Send + Sync>>,
    self_tx: mpsc::UnboundedSender<Event>,
}

impl<T: Transport, C: Consensus> Core<T, C> {
    #[instrument(level = "debug", skip_all, fields(peer = self.peer))]
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Close => {
                    self.transport.close(self.peer).await;
                    self.fail_all(Error::Closed);
                    self.closed = true;
                    break;
                }
                Event::Ping(tx) => self.handle_ping(tx),
                Event::Commit(index, tx) => self.handle_commit(index, tx),
                Event::Responded(kind, lo, hi, outcome) => self.handle_response(kind, lo, hi, outcome),
            }
        }
    }

    fn handle_ping(&mut self, tx: oneshot::Sender<Result<u64>>) {
        if self.closed {
            let _ = tx.send(Err(Error::Closed));
            return;
        }
        self.pending_pings.push(tx);
        if !self.ping_in_flight {
            self.start_ping();
        }
    }

    fn handle_commit(&mut self, index: u64, tx: oneshot::Sender<Result<u64>>) {
        if self.closed {
            let _ = tx.send(Err(Error::Closed));
            return;
        }
        if index <= self.state.match_index {
            let _ = tx.send(Ok(index));
            return;
        }
        self.pending_commits.entry(index).or_default().push(tx);
        if index >= self.state.send_index {
            self.drive();
        }
    }

    fn start_ping(&mut self) {
        self.ping_in_flight = true;
        let prev_index = self.state.match_index;
        let prev_term = if prev_index == 0 {
            0
        } else {
            match self.log.get(prev_index) {
                Ok(Some(entry)) => entry.term,
                Ok(None) => 0,
                Err(e) => {
                    self.ping_in_flight = false;
                    self.resolve_pings(Err(e.into()));
                    return;
                }
            }
        };
        let request = AppendEntriesRequest {
            correlation_id: self.consensus.next_correlation_id(),
            term: self.consensus.current_term(),
            leader: self.consensus.local_member(),
            prev_log_index: prev_index,
            prev_log_term: prev_term,
            entries: Vec::new(),
            leader_commit: self.consensus.commit_index(),
        };
        self.spawn_request(Kind::Ping, 0, 0, request);
    }

    /// Builds and sends the next `AppendEntries` batch, if any is owed
    /// (spec §4.4 "drive() — batch construction").
    fn drive(&mut self) {
        if self.closed || self.append_in_flight.is_some() {
            return;
        }
        let last = self.log.last_index();
        if self.state.send_index > last {
            return;
        }

        let prev_index = self.state.send_index.saturating_sub(1);
        let prev_term = if prev_index == 0 {
            0
        } else {
            match self.log.get(prev_index) {
                Ok(Some(entry)) => entry.term,
                Ok(None) => 0,
                Err(e) => {
                    self.fail_range(self.state.send_index, last, e.into());
                    return;
                }
            }
        };

        let hi_cap = last.min(self.state.send_index + BATCH_SIZE);
        let mut entries = Vec::new();
        let mut idx = self.state.send_index;
        while idx <= hi_cap {
            match self.log.get(idx) {
                Ok(Some(entry)) => {
                    if entry.entry_type.is_snapshot_marker() {
                        if !entries.is_empty() {
                            break;
                        }
                        entries.push(entry);
                        break;
                    }
                    entries.push(entry);
                }
                Ok(None) => {
                    // Body compacted away; the index is still accounted for
                    // by the batch's contiguous range via `idx`.
                }
                Err(e) => {
                    self.fail_range(self.state.send_index, last, e.into());
                    return;
                }
            }
            idx += 1;
        }

        if entries.is_empty() {
            // Nothing left to actually transmit in this window (fully
            // compacted range); the next commit()/ping() tick retries.
            return;
        }

        let lo = self.state.send_index;
        let hi = lo + entries.len() as u64 - 1;
        // Range-correct form, per the design note resolving the source's
        // ambiguous `max(sendIndex + 1, ...)` formula.
        self.state.send_index = prev_index + entries.len() as u64 + 1;

        let request = AppendEntriesRequest {
            correlation_id: self.consensus.next_correlation_id(),
            term: self.consensus.current_term(),
            leader: self.consensus.local_member(),
            prev_log_index: prev_index,
            prev_log_term: prev_term,
            entries,
            leader_commit: self.consensus.commit_index(),
        };
        self.append_in_flight = Some((lo, hi));
        self.spawn_request(Kind::Append, lo, hi, request);
    }

    fn spawn_request(&self, kind: Kind, lo: u64, hi: u64, request: AppendEntriesRequest) {
        let transport = self.transport.clone();
        let peer = self.peer;
        let reply_to = self.self_tx.clone();
        tokio::spawn(async move {
            let outcome = transport.append_entries(peer, request).await;
            let _ = reply_to.send(Event::Responded(kind, lo, hi, outcome));
        });
    }

    fn handle_response(&mut self, kind: Kind, lo: u64, hi: u64, outcome: std::result::Result<AppendEntriesResponse, Error>) {
        match kind {
            Kind::Ping => self.ping_in_flight = false,
            Kind::Append => self.append_in_flight = None,
        }

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(peer = self.peer, ?kind, "replication request failed: {e}");
                match kind {
                    Kind::Ping => self.resolve_pings(Err(e)),
                    Kind::Append => self.fail_range(lo, hi, e),
                }
                return;
            }
        };

        if response.term > self.consensus.current_term() {
            self.stepdown(response.term);
            return;
        }

        match kind {
            Kind::Ping => self.resolve_pings(Ok(self.state.match_index)),
            Kind::Append => self.handle_append_response(lo, hi, response),
        }
    }

    fn handle_append_response(&mut self, lo: u64, hi: u64, response: AppendEntriesResponse) {
        if response.succeeded {
            let prev_index = lo - 1;
            let entries_len = hi - lo + 1;
            self.state.next_index = self.state.next_index.max(prev_index + entries_len + 1);
            self.state.match_index = self.state.match_index.max(prev_index + entries_len);
            debug!(peer = self.peer, match_index = self.state.match_index, "advanced");
            self.resolve_commits_up_to(self.state.match_index);
            if let Some(cb) = &self.on_match_advance {
                cb(self.peer, self.state.match_index);
            }
            if self.state.send_index <= self.log.last_index() {
                self.drive();
            }
        } else {
            // Tie-break (spec §4.4): the follower cannot be ahead of what we
            // last believed we'd sent it.
            let candidate = response.last_log_index + 1;
            let clamped = candidate.min(lo);
            self.state.next_index = clamped;
            self.state.send_index = clamped;
            self.drive();
        }
    }

    fn stepdown(&mut self, term: u64) {
        self.consensus.set_current_term(term);
        self.consensus.set_leader(None);
        self.consensus.transition_to_follower(term);
        self.closed = true;
        self.fail_all(Error::NotLeader);
    }

    fn fail_range(&mut self, lo: u64, hi: u64, err: Error) {
        let keys: Vec<u64> = self.pending_commits.range(lo..=hi).map(|(k, _)| *k).collect();
        for k in keys {
            if let Some(txs) = self.pending_commits.remove(&k) {
                for tx in txs {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }

    fn resolve_commits_up_to(&mut self, match_index: u64) {
        let keys: Vec<u64> = self.pending_commits.range(..=match_index).map(|(k, _)| *k).collect();
        for k in keys {
            if let Some(txs) = self.pending_commits.remove(&k) {
                for tx in txs {
                    let _ = tx.send(Ok(k));
                }
            }
        }
    }

    fn resolve_pings(&mut self, result: Result<u64>) {
        for tx in self.pending_pings.drain(..) {
            let _ = tx.send(result.clone());
        }
    }

    fn fail_all(&mut self, err: Error) {
        for (_, txs) in std::mem::take(&mut self.pending_commits) {
            for tx in txs {
                let _ = tx.send(Err(err.clone()));
            }
        }
        self.resolve_pings(Err(err));
    }
}
