use async_trait::async_trait;
use satchel_crypto::SessionKey;
use satchel_pipeline::AppInstance;
use satchel_types::{BatchId, GroupId};

use crate::error::SyncResult;
use crate::protocol::{EntityUpdate, EventBatch};

/// Read access to the append-only batch log, one log per group.
///
/// Implementations return batches in ascending batch id order for
/// forward reads and descending order when `reverse` is set.
#[async_trait]
pub trait BatchLogSource: Send + Sync {
    /// Loads up to `count` batches of `group` starting just after
    /// `start` (or just before it when `reverse` is set).
    async fn load_range(
        &self,
        group: &GroupId,
        start: &BatchId,
        count: usize,
        reverse: bool,
    ) -> SyncResult<Vec<EventBatch>>;

    /// Loads every batch of `group` with an id strictly greater than
    /// `since`, ascending.
    async fn load_all(&self, group: &GroupId, since: &BatchId) -> SyncResult<Vec<EventBatch>>;
}

/// Resolves the session key guarding an entity's encrypted fields.
///
/// Returning `Ok(None)` means the entity is not readable right now; the
/// pipeline then records per-field errors instead of failing the batch.
#[async_trait]
pub trait SessionKeyProvider: Send + Sync {
    async fn session_key(&self, update: &EntityUpdate) -> SyncResult<Option<SessionKey>>;
}

/// An entity mutation after the pipeline has run.
///
/// `instance` is the decoded application form for creates and updates
/// and `None` for deletes.
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub update: EntityUpdate,
    pub instance: Option<AppInstance>,
}

/// Downstream subscriber notified after a batch has been written to the
/// cache. Consumers run before the group watermark advances, so a
/// failing consumer causes the whole batch to be retried.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn process_batch(
        &self,
        group: &GroupId,
        batch_id: &BatchId,
        updates: &[AppliedUpdate],
    ) -> SyncResult<()>;
}
