use satchel_types::GroupId;
use thiserror::Error;

/// Errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local replica is too far behind the batch log to be repaired
    /// incrementally. The caller must discard the cache and re-seed.
    #[error("local replica is out of sync with the batch log: {0}")]
    OutOfSync(String),

    /// A group the replica was tracking is no longer among the caller's
    /// memberships. Its cached data must be dropped before syncing again.
    #[error("membership for group {0} was removed")]
    MembershipRemoved(GroupId),

    /// The cache contradicts what the membership list says should exist.
    #[error("invalid local state: {0}")]
    InvalidLocalState(String),

    /// The batch log rejected the caller's credentials for a group.
    #[error("not authorized to read the batch log of group {0}")]
    NotAuthorized(GroupId),

    /// A requested log segment does not exist.
    #[error("batch log segment not found: {0}")]
    NotFound(String),

    /// The batch log could not be reached.
    #[error("batch log connection failed: {0}")]
    Connection(String),

    /// A downstream consumer refused a batch.
    #[error("event consumer failed: {0}")]
    Consumer(String),

    #[error(transparent)]
    Cache(#[from] satchel_cache::CacheError),

    #[error(transparent)]
    Pipeline(#[from] satchel_pipeline::PipelineError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A blocking cache task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Task(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
