use std::sync::Mutex;

use raft_log::{Entry, Log, Repo};

/// Read access to the log as seen by the replication engine.
///
/// [`raft_log::Log::get`] takes `&mut self` because segment reads seek a
/// shared file handle; the replication engine only ever needs read access
/// from several concurrent peer actors, so embedders hand it a
/// [`SharedLog`] (or their own `&self`-based adapter) rather than the raw
/// log (spec §5 "The Log exposes thread-safe reads from any Replicator").
pub trait LogReader: Send + Sync + 'static {
    fn get(&self, index: u64) -> raft_log::Result<Option<Entry>>;
    fn last_index(&self) -> u64;
}

/// The default [`LogReader`] adapter: a log behind a mutex, for embedders
/// that do not already serialize access some other way.
pub struct SharedLog<R: Repo> {
    inner: Mutex<Log<R>>,
}

impl<R: Repo> SharedLog<R> {
    pub fn new(log: Log<R>) -> Self {
        Self { inner: Mutex::new(log) }
    }
}

impl<R: Repo + Send + 'static> LogReader for SharedLog<R>
where
    R::Segment: Send,
{
    fn get(&self, index: u64) -> raft_log::Result<Option<Entry>> {
        self.inner.lock().unwrap().get(index)
    }

    fn last_index(&self) -> u64 {
        self.inner.lock().unwrap().last_index()
    }
}
