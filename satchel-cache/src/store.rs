//! The offline cache store.

use crate::entity::{element_id_from_canonical, StoredEntity};
use crate::error::{CacheError, CacheResult};
use crate::handler::CacheHandlerMap;
use crate::retention::{ignore_no_rows, list_table_for, Eviction, RetentionSpec};
use rusqlite::{params, Connection};
use satchel_crypto::SessionKey;
use satchel_model::{ElementKind, TypeModel, TypeModelProvider, TypeRef};
use satchel_types::{BatchId, ElementId, GeneratedId, GroupId, Timestamp};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// How many batch ids the per-group watermark history keeps.
const WATERMARK_HISTORY: usize = 100;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS element_entities (
    type        TEXT NOT NULL,
    element_id  TEXT NOT NULL,
    owner_group TEXT NOT NULL,
    payload     TEXT NOT NULL,
    PRIMARY KEY (type, element_id)
);
CREATE TABLE IF NOT EXISTS list_entities (
    type        TEXT NOT NULL,
    list_id     TEXT NOT NULL,
    element_id  TEXT NOT NULL,
    owner_group TEXT NOT NULL,
    payload     TEXT NOT NULL,
    PRIMARY KEY (type, list_id, element_id)
);
CREATE TABLE IF NOT EXISTS blob_entities (
    type        TEXT NOT NULL,
    archive_id  TEXT NOT NULL,
    element_id  TEXT NOT NULL,
    owner_group TEXT NOT NULL,
    payload     TEXT NOT NULL,
    PRIMARY KEY (type, archive_id, element_id)
);
CREATE TABLE IF NOT EXISTS ranges (
    type    TEXT NOT NULL,
    list_id TEXT NOT NULL,
    lower   TEXT NOT NULL,
    upper   TEXT NOT NULL,
    PRIMARY KEY (type, list_id)
);
CREATE TABLE IF NOT EXISTS group_sync (
    group_id  TEXT PRIMARY KEY,
    batch_ids TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// The cached id range of one list.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRange {
    pub lower: ElementId,
    pub upper: ElementId,
}

/// SQLCipher-backed entity cache.
///
/// One connection behind a mutex; every multi-step operation runs in a
/// transaction. Cache handlers run inside the mutating operation and
/// must not call back into the cache.
pub struct OfflineCache {
    conn: Mutex<Connection>,
    provider: Arc<TypeModelProvider>,
    handlers: CacheHandlerMap,
}

impl OfflineCache {
    /// Opens (or creates) an encrypted cache database. The key is applied
    /// with `PRAGMA key` before any other statement.
    pub fn open(
        path: &Path,
        key: &SessionKey,
        provider: Arc<TypeModelProvider>,
        handlers: CacheHandlerMap,
    ) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "key", format!("x'{}'", key.to_hex()))?;
        Self::init(conn, provider, handlers)
    }

    /// Opens an unencrypted in-memory cache, for tests.
    pub fn open_in_memory(
        provider: Arc<TypeModelProvider>,
        handlers: CacheHandlerMap,
    ) -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?, provider, handlers)
    }

    fn init(
        conn: Connection,
        provider: Arc<TypeModelProvider>,
        handlers: CacheHandlerMap,
    ) -> CacheResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            provider,
            handlers,
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Lock)
    }

    fn model(&self, type_ref: &TypeRef) -> CacheResult<&TypeModel> {
        Ok(self.provider.client_model(type_ref)?)
    }

    /// Inserts or replaces one entity. The type's handler observes the
    /// write before it happens.
    pub fn put(&self, entity: &StoredEntity) -> CacheResult<()> {
        let model = self.model(&entity.type_ref)?;
        check_key(model, entity.list_id.is_some())?;

        if let Some(handler) = self.handlers.get(&entity.type_ref) {
            handler.on_before_cache_update(entity)?;
        }

        let type_key = entity.type_ref.to_string();
        let payload = serde_json::to_string(&entity.payload)?;
        let conn = self.lock()?;
        match model.kind {
            ElementKind::Element => {
                conn.execute(
                    "INSERT OR REPLACE INTO element_entities \
                     (type, element_id, owner_group, payload) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        type_key,
                        entity.element_id.canonical(),
                        entity.owner_group.as_str(),
                        payload
                    ],
                )?;
            }
            ElementKind::ListElement | ElementKind::BlobElement => {
                let (table, list_column) = list_table_for(model.kind);
                let list = entity.list_id.as_ref().ok_or_else(|| {
                    CacheError::InvalidKey(entity.type_ref.clone())
                })?;
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {table} \
                         (type, {list_column}, element_id, owner_group, payload) \
                         VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        type_key,
                        list.as_str(),
                        entity.element_id.canonical(),
                        entity.owner_group.as_str(),
                        payload
                    ],
                )?;
            }
            _ => return Err(CacheError::NotPersistable(entity.type_ref.clone())),
        }
        Ok(())
    }

    pub fn get(
        &self,
        type_ref: &TypeRef,
        list_id: Option<&GeneratedId>,
        element_id: &ElementId,
    ) -> CacheResult<Option<StoredEntity>> {
        let model = self.model(type_ref)?;
        check_key(model, list_id.is_some())?;

        let type_key = type_ref.to_string();
        let conn = self.lock()?;
        let row: Option<(String, String)> = match model.kind {
            ElementKind::Element => conn
                .query_row(
                    "SELECT owner_group, payload FROM element_entities \
                     WHERE type = ?1 AND element_id = ?2",
                    params![type_key, element_id.canonical()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(ignore_no_rows)?,
            ElementKind::ListElement | ElementKind::BlobElement => {
                let (table, list_column) = list_table_for(model.kind);
                let list = list_id.ok_or_else(|| CacheError::InvalidKey(type_ref.clone()))?;
                conn.query_row(
                    &format!(
                        "SELECT owner_group, payload FROM {table} \
                         WHERE type = ?1 AND {list_column} = ?2 AND element_id = ?3"
                    ),
                    params![type_key, list.as_str(), element_id.canonical()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(ignore_no_rows)?
            }
            _ => return Err(CacheError::NotPersistable(type_ref.clone())),
        };

        let Some((owner_group, payload)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredEntity {
            type_ref: type_ref.clone(),
            list_id: list_id.cloned(),
            element_id: element_id.clone(),
            owner_group: GeneratedId::parse(&owner_group)?,
            payload: serde_json::from_str(&payload)?,
        }))
    }

    /// Fetches several list elements; absent ids are skipped and found
    /// entities follow the order of `ids`.
    pub fn provide_multiple(
        &self,
        type_ref: &TypeRef,
        list_id: &GeneratedId,
        ids: &[ElementId],
    ) -> CacheResult<Vec<StoredEntity>> {
        let mut found = Vec::new();
        for id in ids {
            if let Some(entity) = self.get(type_ref, Some(list_id), id)? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    pub fn delete_if_exists(
        &self,
        type_ref: &TypeRef,
        list_id: Option<&GeneratedId>,
        element_id: &ElementId,
    ) -> CacheResult<()> {
        let model = self.model(type_ref)?;
        check_key(model, list_id.is_some())?;

        if let Some(handler) = self.handlers.get(type_ref) {
            handler.on_before_cache_deletion(type_ref, list_id, element_id)?;
        }

        let type_key = type_ref.to_string();
        let conn = self.lock()?;
        match model.kind {
            ElementKind::Element => {
                conn.execute(
                    "DELETE FROM element_entities WHERE type = ?1 AND element_id = ?2",
                    params![type_key, element_id.canonical()],
                )?;
            }
            ElementKind::ListElement | ElementKind::BlobElement => {
                let (table, list_column) = list_table_for(model.kind);
                let list = list_id.ok_or_else(|| CacheError::InvalidKey(type_ref.clone()))?;
                conn.execute(
                    &format!(
                        "DELETE FROM {table} \
                         WHERE type = ?1 AND {list_column} = ?2 AND element_id = ?3"
                    ),
                    params![type_key, list.as_str(), element_id.canonical()],
                )?;
                // A range row for an empty list would claim the gap is
                // fully cached.
                let remaining: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {table} WHERE type = ?1 AND {list_column} = ?2"
                    ),
                    params![type_key, list.as_str()],
                    |row| row.get(0),
                )?;
                if remaining == 0 {
                    conn.execute(
                        "DELETE FROM ranges WHERE type = ?1 AND list_id = ?2",
                        params![type_key, list.as_str()],
                    )?;
                }
            }
            _ => return Err(CacheError::NotPersistable(type_ref.clone())),
        }
        Ok(())
    }

    pub fn delete_in(
        &self,
        type_ref: &TypeRef,
        list_id: &GeneratedId,
        ids: &[ElementId],
    ) -> CacheResult<()> {
        for id in ids {
            self.delete_if_exists(type_ref, Some(list_id), id)?;
        }
        Ok(())
    }

    /// Removes every cached entity of a type, together with all of the
    /// type's range rows.
    pub fn delete_all_of_type(&self, type_ref: &TypeRef) -> CacheResult<()> {
        let model = self.model(type_ref)?;
        let type_key = type_ref.to_string();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let rows: Vec<(Option<String>, String)> = match model.kind {
                ElementKind::Element => {
                    let mut stmt = tx.prepare(
                        "SELECT element_id FROM element_entities WHERE type = ?1",
                    )?;
                    let rows = stmt
                        .query_map(params![type_key], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.into_iter().map(|e| (None, e)).collect()
                }
                ElementKind::ListElement | ElementKind::BlobElement => {
                    let (table, list_column) = list_table_for(model.kind);
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {list_column}, element_id FROM {table} WHERE type = ?1"
                    ))?;
                    let rows = stmt
                        .query_map(params![type_key], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.into_iter().map(|(l, e)| (Some(l), e)).collect()
                }
                _ => return Err(CacheError::NotPersistable(type_ref.clone())),
            };

            if let Some(handler) = self.handlers.get(type_ref) {
                for (list, element) in &rows {
                    let list_id = list.as_deref().map(GeneratedId::parse).transpose()?;
                    let element_id = element_id_from_canonical(model, element);
                    handler.on_before_cache_deletion(type_ref, list_id.as_ref(), &element_id)?;
                }
            }

            match model.kind {
                ElementKind::Element => {
                    tx.execute(
                        "DELETE FROM element_entities WHERE type = ?1",
                        params![type_key],
                    )?;
                }
                _ => {
                    let (table, _) = list_table_for(model.kind);
                    tx.execute(&format!("DELETE FROM {table} WHERE type = ?1"), params![type_key])?;
                }
            }
            tx.execute("DELETE FROM ranges WHERE type = ?1", params![type_key])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes every entity owned by a group, the range rows of the lists
    /// this empties, and the group's sync watermark.
    pub fn delete_all_owned_by(&self, group: &GroupId) -> CacheResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            // Handlers see every row that is about to go, same as the
            // other deletion paths.
            for model in self.provider.persistent_client_models() {
                let type_ref = TypeRef::new(model.app.clone(), model.id);
                let Some(handler) = self.handlers.get(&type_ref) else {
                    continue;
                };
                let type_key = type_ref.to_string();
                match model.kind {
                    ElementKind::Element => {
                        let mut stmt = tx.prepare(
                            "SELECT element_id FROM element_entities \
                             WHERE type = ?1 AND owner_group = ?2",
                        )?;
                        let rows = stmt
                            .query_map(params![type_key, group.as_str()], |row| {
                                row.get::<_, String>(0)
                            })?
                            .collect::<Result<Vec<_>, _>>()?;
                        for element in rows {
                            let element_id = element_id_from_canonical(model, &element);
                            handler.on_before_cache_deletion(&type_ref, None, &element_id)?;
                        }
                    }
                    ElementKind::ListElement | ElementKind::BlobElement => {
                        let (table, list_column) = list_table_for(model.kind);
                        let mut stmt = tx.prepare(&format!(
                            "SELECT {list_column}, element_id FROM {table} \
                             WHERE type = ?1 AND owner_group = ?2"
                        ))?;
                        let rows = stmt
                            .query_map(params![type_key, group.as_str()], |row| {
                                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                            })?
                            .collect::<Result<Vec<_>, _>>()?;
                        for (list, element) in rows {
                            let list_id = GeneratedId::parse(&list)?;
                            let element_id = element_id_from_canonical(model, &element);
                            handler.on_before_cache_deletion(
                                &type_ref,
                                Some(&list_id),
                                &element_id,
                            )?;
                        }
                    }
                    _ => {}
                }
            }

            tx.execute(
                "DELETE FROM element_entities WHERE owner_group = ?1",
                params![group.as_str()],
            )?;
            for (table, list_column) in [("list_entities", "list_id"), ("blob_entities", "archive_id")]
            {
                let lists: Vec<(String, String)> = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT DISTINCT type, {list_column} FROM {table} WHERE owner_group = ?1"
                    ))?;
                    let rows = stmt.query_map(params![group.as_str()], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                    rows.collect::<Result<_, _>>()?
                };
                tx.execute(
                    &format!("DELETE FROM {table} WHERE owner_group = ?1"),
                    params![group.as_str()],
                )?;
                for (type_key, list) in lists {
                    let remaining: i64 = tx.query_row(
                        &format!(
                            "SELECT COUNT(*) FROM {table} WHERE type = ?1 AND {list_column} = ?2"
                        ),
                        params![type_key, list],
                        |row| row.get(0),
                    )?;
                    if remaining == 0 {
                        tx.execute(
                            "DELETE FROM ranges WHERE type = ?1 AND list_id = ?2",
                            params![type_key, list],
                        )?;
                    }
                }
            }
            tx.execute(
                "DELETE FROM group_sync WHERE group_id = ?1",
                params![group.as_str()],
            )?;
        }
        tx.commit()?;
        debug!(group = %group, "deleted all cached data owned by group");
        Ok(())
    }

    /// Replaces the cached range of a list. `lower` must not exceed
    /// `upper` under canonical ordering.
    pub fn set_new_range_for_list(
        &self,
        type_ref: &TypeRef,
        list_id: &GeneratedId,
        lower: &ElementId,
        upper: &ElementId,
    ) -> CacheResult<()> {
        if lower.canonical() > upper.canonical() {
            return Err(CacheError::InvalidRange {
                lower: lower.canonical().to_string(),
                upper: upper.canonical().to_string(),
            });
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO ranges (type, list_id, lower, upper) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                type_ref.to_string(),
                list_id.as_str(),
                lower.canonical(),
                upper.canonical()
            ],
        )?;
        Ok(())
    }

    /// The cached range of a list, if any. A list without a range row is
    /// never treated as fully cached.
    pub fn get_range_for_list(
        &self,
        type_ref: &TypeRef,
        list_id: &GeneratedId,
    ) -> CacheResult<Option<CacheRange>> {
        let model = self.model(type_ref)?;
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT lower, upper FROM ranges WHERE type = ?1 AND list_id = ?2",
                params![type_ref.to_string(), list_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(row.map(|(lower, upper)| CacheRange {
            lower: element_id_from_canonical(model, &lower),
            upper: element_id_from_canonical(model, &upper),
        }))
    }

    /// Records a successfully applied batch in the group's watermark
    /// history (bounded, newest first).
    pub fn put_last_batch_id_for_group(
        &self,
        group: &GroupId,
        batch_id: &BatchId,
    ) -> CacheResult<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT batch_ids FROM group_sync WHERE group_id = ?1",
                params![group.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let mut ids: Vec<String> = match existing {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        ids.push(batch_id.as_str().to_string());
        ids.sort();
        ids.dedup();
        ids.reverse();
        ids.truncate(WATERMARK_HISTORY);

        conn.execute(
            "INSERT OR REPLACE INTO group_sync (group_id, batch_ids) VALUES (?1, ?2)",
            params![group.as_str(), serde_json::to_string(&ids)?],
        )?;
        Ok(())
    }

    /// The group's remembered batch ids, newest first. `None` means the
    /// group has never been tracked; an empty history means it has been
    /// seeded but no batch has been applied yet.
    pub fn get_last_batch_ids_for_group(
        &self,
        group: &GroupId,
    ) -> CacheResult<Option<Vec<BatchId>>> {
        let conn = self.lock()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT batch_ids FROM group_sync WHERE group_id = ?1",
                params![group.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        let Some(json) = row else {
            return Ok(None);
        };
        let raw: Vec<String> = serde_json::from_str(&json)?;
        let ids = raw
            .iter()
            .map(|s| GeneratedId::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(ids))
    }

    /// Seeds an empty watermark row for a newly tracked group.
    pub fn track_group(&self, group: &GroupId) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO group_sync (group_id, batch_ids) VALUES (?1, '[]')",
            params![group.as_str()],
        )?;
        Ok(())
    }

    pub fn remove_group(&self, group: &GroupId) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM group_sync WHERE group_id = ?1",
            params![group.as_str()],
        )?;
        Ok(())
    }

    /// All groups with a watermark row.
    pub fn tracked_groups(&self) -> CacheResult<Vec<GroupId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT group_id FROM group_sync")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(GeneratedId::parse(&row?)?);
        }
        Ok(groups)
    }

    pub fn get_last_sync_time(&self) -> CacheResult<Option<Timestamp>> {
        let conn = self.lock()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'last_sync_time'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(row
            .and_then(|v| v.parse::<u64>().ok())
            .map(Timestamp::from_millis))
    }

    pub fn put_last_sync_time(&self, time: Timestamp) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_sync_time', ?1)",
            params![time.as_millis().to_string()],
        )?;
        Ok(())
    }

    /// Drops every cached row. Used when the local replica can no longer
    /// be trusted and must be rebuilt from the server.
    pub fn purge(&self) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "DELETE FROM element_entities;
             DELETE FROM list_entities;
             DELETE FROM blob_entities;
             DELETE FROM ranges;
             DELETE FROM group_sync;
             DELETE FROM meta;",
        )?;
        info!("offline cache purged");
        Ok(())
    }

    /// Evicts entities that fell out of the retention window, cascading
    /// through dependent associations and repairing range rows. Runs in
    /// one transaction; an interrupted run leaves the previous state.
    pub fn clear_excluded_data(
        &self,
        cutoff: Timestamp,
        spec: &RetentionSpec,
    ) -> CacheResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = Eviction::run(&tx, &self.provider, &self.handlers, spec, cutoff)?;
        tx.commit()?;
        Ok(deleted)
    }
}

fn check_key(model: &TypeModel, has_list: bool) -> CacheResult<()> {
    let ok = match model.kind {
        ElementKind::Element => !has_list,
        ElementKind::ListElement | ElementKind::BlobElement => has_list,
        _ => return Err(CacheError::NotPersistable(model.type_ref())),
    };
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(model.type_ref()))
    }
}
