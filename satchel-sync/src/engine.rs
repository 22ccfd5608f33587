//! Incremental per-group sync over the append-only batch log.
//!
//! Catch-up downloads the batches missed while offline, then realtime
//! batches keep the steady state current. Batches apply strictly in id
//! order per group, and the group watermark only advances after the
//! cache write and every consumer succeeded, so an interrupted batch is
//! picked up again on the next start.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use satchel_cache::{CacheResult, OfflineCache, StoredEntity};
use satchel_pipeline::InstancePipeline;
use satchel_types::{BatchId, GeneratedId, GroupId, Timestamp};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{BatchOperation, EntityUpdate, EventBatch, Membership};
use crate::queue::RealtimeQueue;
use crate::source::{AppliedUpdate, BatchLogSource, EventConsumer, SessionKeyProvider};
use crate::state::{GroupPhase, SyncState};

const MILLIS_PER_DAY: u64 = 86_400_000;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far behind the newest remembered batch catch-up starts (ms).
    /// The overlap makes delivery at-least-once across restarts.
    pub lookback_ms: u64,
    /// How long the batch log retains entries (days). A replica that
    /// slept longer than this cannot be repaired incrementally.
    pub batch_ttl_days: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_ms: 60_000,
            batch_ttl_days: 45,
        }
    }
}

/// The sync engine. Drives catch-up and realtime application of event
/// batches into the offline cache.
pub struct SyncEngine {
    config: SyncConfig,
    cache: Arc<OfflineCache>,
    pipeline: InstancePipeline,
    source: Arc<dyn BatchLogSource>,
    keys: Arc<dyn SessionKeyProvider>,
    consumers: Vec<Arc<dyn EventConsumer>>,
    state: Arc<RwLock<SyncState>>,
    realtime: Arc<RwLock<RealtimeQueue>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        cache: Arc<OfflineCache>,
        pipeline: InstancePipeline,
        source: Arc<dyn BatchLogSource>,
        keys: Arc<dyn SessionKeyProvider>,
    ) -> Self {
        Self {
            config,
            cache,
            pipeline,
            source,
            keys,
            consumers: Vec::new(),
            state: Arc::new(RwLock::new(SyncState::default())),
            realtime: Arc::new(RwLock::new(RealtimeQueue::new())),
        }
    }

    /// Registers a consumer notified after each batch lands in the cache.
    pub fn add_consumer(&mut self, consumer: Arc<dyn EventConsumer>) {
        self.consumers.push(consumer);
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn group_phase(&self, group: &GroupId) -> GroupPhase {
        self.state.read().await.phase(group)
    }

    // ── Catch-up ─────────────────────────────────────────────────

    /// Brings every membership's group up to date with the batch log.
    ///
    /// Realtime delivery is held back until catch-up finishes; buffered
    /// realtime batches are then replayed minus the ones catch-up
    /// already covered. Returns the number of batches applied.
    pub async fn catch_up(&self, memberships: &[Membership]) -> SyncResult<usize> {
        self.realtime.write().await.pause();

        let cache = self.cache.clone();
        let last_sync = run_blocking(move || cache.get_last_sync_time()).await?;
        self.check_staleness(last_sync)?;
        self.check_memberships(memberships).await?;

        let mut pending: BTreeMap<GroupId, Vec<EventBatch>> = BTreeMap::new();
        for membership in memberships {
            {
                let mut state = self.state.write().await;
                state.set_phase(&membership.group_id, GroupPhase::CatchingUp);
            }
            match self.plan_group(membership, last_sync.is_some()).await {
                Ok(batches) if !batches.is_empty() => {
                    pending.insert(membership.group_id.clone(), batches);
                }
                Ok(_) => {}
                Err(SyncError::NotAuthorized(group)) => {
                    warn!(group = %group, "not authorized for group, skipping");
                    self.state.write().await.forget(&group);
                }
                Err(e) => return Err(e),
            }
        }

        let mut applied = 0;
        for batches in pending.values() {
            for batch in batches {
                self.apply_batch(batch).await?;
                applied += 1;
            }
        }
        {
            let mut state = self.state.write().await;
            for membership in memberships {
                if state.phase(&membership.group_id) == GroupPhase::CatchingUp {
                    state.set_phase(&membership.group_id, GroupPhase::Steady);
                }
            }
        }

        let cache = self.cache.clone();
        run_blocking(move || cache.put_last_sync_time(Timestamp::now())).await?;

        let floors = self.state.read().await.floors().clone();
        let held_back = self.realtime.write().await.resume(&floors);
        for batch in held_back {
            self.apply_batch(&batch).await?;
            applied += 1;
        }

        info!(applied, groups = memberships.len(), "catch-up complete");
        Ok(applied)
    }

    /// Delivers a batch pushed by the server. While catch-up runs the
    /// batch is buffered; once steady it applies immediately unless it
    /// was already covered.
    pub async fn receive_realtime(&self, batch: EventBatch) -> SyncResult<()> {
        let Some(batch) = self.realtime.write().await.offer(batch) else {
            return Ok(());
        };
        if let Some(floor) = self.state.read().await.floor(&batch.group_id) {
            if batch.batch_id <= *floor {
                debug!(group = %batch.group_id, batch = %batch.batch_id, "dropping already applied batch");
                return Ok(());
            }
        }
        self.apply_batch(&batch).await?;
        let cache = self.cache.clone();
        run_blocking(move || cache.put_last_sync_time(Timestamp::now())).await
    }

    /// Drops all locally cached data of a group the caller no longer
    /// belongs to.
    pub async fn forget_group(&self, group: &GroupId) -> SyncResult<()> {
        let cache = self.cache.clone();
        let owner = group.clone();
        run_blocking(move || cache.delete_all_owned_by(&owner)).await?;
        self.state.write().await.forget(group);
        info!(group = %group, "dropped local data for removed group");
        Ok(())
    }

    // ── Planning ─────────────────────────────────────────────────

    fn check_staleness(&self, last_sync: Option<Timestamp>) -> SyncResult<()> {
        let Some(last_sync) = last_sync else {
            return Ok(());
        };
        let age_days = Timestamp::now().millis_since(last_sync) / MILLIS_PER_DAY;
        if age_days >= self.config.batch_ttl_days {
            return Err(SyncError::OutOfSync(format!(
                "last sync was {age_days} days ago, the batch log retains {} days",
                self.config.batch_ttl_days
            )));
        }
        Ok(())
    }

    async fn check_memberships(&self, memberships: &[Membership]) -> SyncResult<()> {
        let cache = self.cache.clone();
        let tracked = run_blocking(move || cache.tracked_groups()).await?;
        let current: HashSet<&GroupId> = memberships.iter().map(|m| &m.group_id).collect();
        for group in tracked {
            if !current.contains(&group) {
                return Err(SyncError::MembershipRemoved(group));
            }
        }
        Ok(())
    }

    /// Works out which batches a group still has to apply.
    ///
    /// The download window starts `lookback_ms` before the newest
    /// remembered batch. If that would reach at or past the oldest
    /// remembered batch, the start is raised to just below the oldest
    /// instead; everything older was already applied.
    async fn plan_group(
        &self,
        membership: &Membership,
        synced_before: bool,
    ) -> SyncResult<Vec<EventBatch>> {
        let group = &membership.group_id;
        let cache = self.cache.clone();
        let owner = group.clone();
        let remembered = run_blocking(move || cache.get_last_batch_ids_for_group(&owner)).await?;

        let Some(remembered) = remembered else {
            if membership.initialized {
                return Err(SyncError::InvalidLocalState(format!(
                    "group {group} is marked initialized but has no sync row"
                )));
            }
            self.seed_group(group).await?;
            return Ok(Vec::new());
        };

        let start = match (remembered.first(), remembered.last()) {
            (Some(newest), Some(oldest)) => {
                let lookback = newest
                    .timestamp()
                    .saturating_sub_millis(self.config.lookback_ms);
                let floor = oldest.timestamp().saturating_sub_millis(1);
                GeneratedId::from_timestamp(lookback.max(floor), 0)
            }
            _ => GeneratedId::min_id(),
        };

        let batches = match self.source.load_all(group, &start).await {
            Ok(batches) => batches,
            Err(SyncError::NotFound(reason)) => {
                debug!(group = %group, reason, "batch log window empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let known: HashSet<&BatchId> = remembered.iter().collect();
        if !remembered.is_empty() && !batches.is_empty() {
            let overlaps = batches.iter().any(|b| known.contains(&b.batch_id));
            // A window that shares nothing with the watermarks means
            // batches expired between the last run and now. A recorded
            // sync time inside the retention window proves otherwise.
            if !overlaps && !synced_before {
                return Err(SyncError::OutOfSync(format!(
                    "no loaded batch of group {group} overlaps its remembered watermarks"
                )));
            }
        }

        if let Some(newest) = remembered.first() {
            self.state.write().await.raise_floor(group, newest);
        }

        let mut fresh: Vec<EventBatch> = batches
            .into_iter()
            .filter(|b| !known.contains(&b.batch_id))
            .collect();
        fresh.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        debug!(group = %group, pending = fresh.len(), "planned catch-up window");
        Ok(fresh)
    }

    /// First contact with a group: remember the head of its log and
    /// start syncing forward from there.
    async fn seed_group(&self, group: &GroupId) -> SyncResult<()> {
        let head = self
            .source
            .load_range(group, &GeneratedId::max_id(), 1, true)
            .await?;
        let newest_id = head.first().map(|b| b.batch_id.clone());

        let cache = self.cache.clone();
        let owner = group.clone();
        let seed = newest_id.clone();
        run_blocking(move || {
            cache.track_group(&owner)?;
            if let Some(id) = &seed {
                cache.put_last_batch_id_for_group(&owner, id)?;
            }
            Ok(())
        })
        .await?;

        if let Some(id) = &newest_id {
            self.state.write().await.raise_floor(group, id);
        }
        debug!(group = %group, "seeded group at the head of its batch log");
        Ok(())
    }

    // ── Application ──────────────────────────────────────────────

    async fn apply_batch(&self, batch: &EventBatch) -> SyncResult<()> {
        let mut applied: Vec<AppliedUpdate> = Vec::with_capacity(batch.updates.len());
        for update in &batch.updates {
            if let Some(done) = self.apply_update(update).await? {
                applied.push(done);
            }
        }
        for consumer in &self.consumers {
            consumer
                .process_batch(&batch.group_id, &batch.batch_id, &applied)
                .await?;
        }

        let cache = self.cache.clone();
        let (group, id) = (batch.group_id.clone(), batch.batch_id.clone());
        run_blocking(move || cache.put_last_batch_id_for_group(&group, &id)).await?;
        self.state
            .write()
            .await
            .raise_floor(&batch.group_id, &batch.batch_id);
        debug!(
            group = %batch.group_id,
            batch = %batch.batch_id,
            updates = applied.len(),
            "applied batch"
        );
        Ok(())
    }

    async fn apply_update(&self, update: &EntityUpdate) -> SyncResult<Option<AppliedUpdate>> {
        // A replica can lag behind the server's model version; updates
        // for types it does not know are skipped, not fatal.
        let Some(model) = self
            .pipeline
            .provider()
            .resolve_server_type_ref(&update.type_ref)
        else {
            debug!(type_ref = %update.type_ref, "skipping update for unknown type");
            return Ok(None);
        };
        let persistent = model.kind.is_persistent();

        match update.operation {
            BatchOperation::Create | BatchOperation::Update => {
                let Some(payload) = &update.payload else {
                    warn!(
                        type_ref = %update.type_ref,
                        element = %update.element_id,
                        "batch entry carries no payload, skipping"
                    );
                    return Ok(None);
                };
                let key = self.keys.session_key(update).await?;
                let instance =
                    self.pipeline
                        .decrypt_from_wire(&update.type_ref, payload, key.as_ref())?;

                if persistent {
                    let entity = StoredEntity {
                        type_ref: update.type_ref.clone(),
                        list_id: update.list_id.clone(),
                        element_id: update.element_id.clone(),
                        owner_group: update.owner_group.clone(),
                        payload: payload.clone(),
                    };
                    let cache = self.cache.clone();
                    run_blocking(move || cache.put(&entity)).await?;
                }
                Ok(Some(AppliedUpdate {
                    update: update.clone(),
                    instance: Some(instance),
                }))
            }
            BatchOperation::Delete => {
                if persistent {
                    let cache = self.cache.clone();
                    let type_ref = update.type_ref.clone();
                    let list_id = update.list_id.clone();
                    let element_id = update.element_id.clone();
                    run_blocking(move || {
                        cache.delete_if_exists(&type_ref, list_id.as_ref(), &element_id)
                    })
                    .await?;
                }
                Ok(Some(AppliedUpdate {
                    update: update.clone(),
                    instance: None,
                }))
            }
        }
    }
}

/// Runs a cache call on the blocking pool.
async fn run_blocking<T, F>(f: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CacheResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(SyncError::Task(e.to_string())),
    }
}
