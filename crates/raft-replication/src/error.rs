use thiserror::Error;

/// Errors surfaced by [`crate::Replicator`] and [`crate::ReplicationGroup`].
///
/// Mirrors the error-kind catalog of the consensus storage kernel (spec §7):
/// log-level errors are wrapped rather than flattened, since a log invariant
/// violation is a leader bug, not a replication-protocol outcome.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Operation attempted before `open()` succeeded.
    #[error("not open")]
    NotOpen,

    /// A higher term was observed; the caller has stepped down.
    #[error("not leader")]
    NotLeader,

    /// The replicator (or group) was closed; outstanding futures fail with this.
    #[error("closed")]
    Closed,

    /// The transport layer failed to deliver or complete a request.
    #[error("transport error: {0}")]
    TransportError(String),

    #[error("log error: {0}")]
    Log(String),
}

impl From<raft_log::Error> for Error {
    fn from(e: raft_log::Error) -> Self {
        Error::Log(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
