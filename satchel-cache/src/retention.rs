//! Time-window eviction.
//!
//! Retention is declared, not hardcoded: a [`RetentionSpec`] names the
//! root list types governed by a time window, plus per-list cutoff
//! overrides for lists retained on a different schedule (trash- and
//! spam-like lists). Deleting a root entity transitively deletes the
//! targets of its `dependent` associations, across types and tables,
//! driven purely by association metadata.

use crate::entity::element_id_from_canonical;
use crate::error::{CacheError, CacheResult};
use crate::handler::CacheHandlerMap;
use rusqlite::{params, Transaction};
use satchel_model::{
    AssociationKind, ElementKind, IdKind, TypeModel, TypeModelProvider, TypeRef,
};
use satchel_pipeline::{UntypedInstance, UntypedValue};
use satchel_types::{CustomId, GeneratedId, Timestamp, UserId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Declares which data a user's time-window retention governs.
///
/// Roots are list or blob element types whose lists are windowed.
/// Folder-like types that are not named here are never evicted.
#[derive(Debug, Clone)]
pub struct RetentionSpec {
    /// The user whose scope this spec was derived for.
    pub user_id: UserId,
    /// Windowed root types.
    pub roots: Vec<TypeRef>,
    /// Per-list cutoff overrides, evaluated instead of the global cutoff
    /// even when they retain less.
    pub list_cutoffs: HashMap<GeneratedId, Timestamp>,
}

impl RetentionSpec {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            roots: Vec::new(),
            list_cutoffs: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_root(mut self, type_ref: TypeRef) -> Self {
        self.roots.push(type_ref);
        self
    }

    #[must_use]
    pub fn with_list_cutoff(mut self, list_id: GeneratedId, cutoff: Timestamp) -> Self {
        self.list_cutoffs.insert(list_id, cutoff);
        self
    }
}

/// The cutoff element id for a type's id encoding. Elements strictly
/// below this id fall out of the window.
pub(crate) fn cutoff_id_for(model: &TypeModel, cutoff: Timestamp) -> String {
    match model.id_kind() {
        IdKind::Generated => GeneratedId::from_timestamp(cutoff, 0).as_str().to_string(),
        IdKind::Custom => {
            CustomId::from_time_and_inner(cutoff, GeneratedId::max_id().as_str())
                .as_str()
                .to_string()
        }
    }
}

pub(crate) struct Eviction<'a> {
    tx: &'a Transaction<'a>,
    provider: &'a TypeModelProvider,
    handlers: &'a CacheHandlerMap,
    visited: HashSet<(String, String)>,
    deleted: usize,
}

impl<'a> Eviction<'a> {
    pub(crate) fn run(
        tx: &'a Transaction<'a>,
        provider: &'a TypeModelProvider,
        handlers: &'a CacheHandlerMap,
        spec: &RetentionSpec,
        cutoff: Timestamp,
    ) -> CacheResult<usize> {
        let mut eviction = Self {
            tx,
            provider,
            handlers,
            visited: HashSet::new(),
            deleted: 0,
        };

        for root in &spec.roots {
            let model = provider.client_model(root)?;
            if !matches!(model.kind, ElementKind::ListElement | ElementKind::BlobElement) {
                warn!(type_ref = %root, "retention root is not list-structured, skipping");
                continue;
            }
            eviction.evict_root(model, spec, cutoff)?;
        }

        debug!(
            user_id = %spec.user_id,
            cutoff = cutoff.as_millis(),
            deleted = eviction.deleted,
            "time-window eviction finished"
        );
        Ok(eviction.deleted)
    }

    fn evict_root(
        &mut self,
        model: &TypeModel,
        spec: &RetentionSpec,
        cutoff: Timestamp,
    ) -> CacheResult<()> {
        let type_key = model.type_ref().to_string();
        let (table, list_column) = list_table_for(model.kind);

        // Lists with cached rows plus lists known only through a range.
        let mut lists: Vec<String> = {
            let mut stmt = self.tx.prepare(&format!(
                "SELECT DISTINCT {list_column} FROM {table} WHERE type = ?1 \
                 UNION SELECT list_id FROM ranges WHERE type = ?1"
            ))?;
            let rows = stmt.query_map(params![type_key], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        lists.sort();

        for list in lists {
            let list_id = GeneratedId::parse(&list)?;
            let list_cutoff = spec.list_cutoffs.get(&list_id).copied().unwrap_or(cutoff);
            let cutoff_id = cutoff_id_for(model, list_cutoff);
            self.evict_list(model, table, list_column, &list, &cutoff_id)?;
        }
        Ok(())
    }

    fn evict_list(
        &mut self,
        model: &TypeModel,
        table: &str,
        list_column: &str,
        list: &str,
        cutoff_id: &str,
    ) -> CacheResult<()> {
        let type_key = model.type_ref().to_string();

        let doomed: Vec<String> = {
            let mut stmt = self.tx.prepare(&format!(
                "SELECT element_id FROM {table} \
                 WHERE type = ?1 AND {list_column} = ?2 AND element_id < ?3"
            ))?;
            let rows = stmt.query_map(params![type_key, list, cutoff_id], |row| {
                row.get::<_, String>(0)
            })?;
            rows.collect::<Result<_, _>>()?
        };
        for element in &doomed {
            self.delete_entity(model, Some(list), element)?;
        }

        // Range repair. A range wholly above the cutoff is left untouched
        // so unaffected lists cost no writes.
        let range: Option<(String, String)> = self
            .tx
            .query_row(
                "SELECT lower, upper FROM ranges WHERE type = ?1 AND list_id = ?2",
                params![type_key, list],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        if let Some((lower, upper)) = range {
            if upper.as_str() < cutoff_id {
                self.tx.execute(
                    "DELETE FROM ranges WHERE type = ?1 AND list_id = ?2",
                    params![type_key, list],
                )?;
            } else if lower.as_str() < cutoff_id {
                self.tx.execute(
                    "UPDATE ranges SET lower = ?3 WHERE type = ?1 AND list_id = ?2",
                    params![type_key, list, cutoff_id],
                )?;
            }
        }
        Ok(())
    }

    /// Deletes one entity row, its dependents first.
    fn delete_entity(
        &mut self,
        model: &TypeModel,
        list: Option<&str>,
        element: &str,
    ) -> CacheResult<()> {
        let type_key = model.type_ref().to_string();
        let row_key = format!("{}/{element}", list.unwrap_or(""));
        if !self.visited.insert((type_key.clone(), row_key)) {
            return Ok(());
        }

        let payload: Option<String> = match (model.kind, list) {
            (ElementKind::Element, _) => self
                .tx
                .query_row(
                    "SELECT payload FROM element_entities WHERE type = ?1 AND element_id = ?2",
                    params![type_key, element],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)?,
            (ElementKind::ListElement | ElementKind::BlobElement, Some(list)) => {
                let (table, list_column) = list_table_for(model.kind);
                self.tx
                    .query_row(
                        &format!(
                            "SELECT payload FROM {table} \
                             WHERE type = ?1 AND {list_column} = ?2 AND element_id = ?3"
                        ),
                        params![type_key, list, element],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(ignore_no_rows)?
            }
            _ => None,
        };
        let Some(payload) = payload else {
            // Not cached; nothing to cascade from.
            return Ok(());
        };

        if let Some(handler) = self.handlers.get(&model.type_ref()) {
            let list_id = list.map(GeneratedId::parse).transpose()?;
            let element_id = element_id_from_canonical(model, element);
            handler.on_before_cache_deletion(&model.type_ref(), list_id.as_ref(), &element_id)?;
        }

        let instance: UntypedInstance = serde_json::from_str(&payload)?;
        self.cascade_from_payload(model, &instance)?;

        match (model.kind, list) {
            (ElementKind::Element, _) => {
                self.tx.execute(
                    "DELETE FROM element_entities WHERE type = ?1 AND element_id = ?2",
                    params![type_key, element],
                )?;
            }
            (ElementKind::ListElement | ElementKind::BlobElement, Some(list)) => {
                let (table, list_column) = list_table_for(model.kind);
                self.tx.execute(
                    &format!(
                        "DELETE FROM {table} \
                         WHERE type = ?1 AND {list_column} = ?2 AND element_id = ?3"
                    ),
                    params![type_key, list, element],
                )?;
            }
            _ => {}
        }
        self.deleted += 1;
        Ok(())
    }

    /// Follows `dependent` associations (and aggregates, which may carry
    /// them) of one payload.
    fn cascade_from_payload(
        &mut self,
        model: &TypeModel,
        payload: &UntypedInstance,
    ) -> CacheResult<()> {
        for assoc in model.associations.values() {
            if assoc.kind == AssociationKind::Aggregation {
                let Some(UntypedValue::Aggregates(nested)) = payload.get(assoc.id) else {
                    continue;
                };
                let nested_model = self.provider.client_model(&assoc.ref_type())?;
                for instance in nested {
                    self.cascade_from_payload(nested_model, instance)?;
                }
                continue;
            }
            if !assoc.dependent {
                continue;
            }

            let target_model = self.provider.client_model(&assoc.ref_type())?;
            match payload.get(assoc.id) {
                Some(UntypedValue::Strings(ids)) if assoc.kind == AssociationKind::ListAssociation => {
                    for list in ids.clone() {
                        self.delete_dependent_list(target_model, &list)?;
                    }
                }
                Some(UntypedValue::Strings(ids)) => {
                    for id in ids.clone() {
                        self.delete_entity(target_model, None, &id)?;
                    }
                }
                Some(UntypedValue::IdTuples(tuples)) => {
                    let mut lists: Vec<String> = Vec::new();
                    for [list, element] in tuples.clone() {
                        self.delete_entity(target_model, Some(&list), &element)?;
                        if !lists.contains(&list) {
                            lists.push(list);
                        }
                    }
                    for list in &lists {
                        self.drop_range_if_list_empty(target_model, list)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Drops a list's range row once a cascade emptied the list. A range
    /// row for an empty list would claim the gap is fully cached.
    fn drop_range_if_list_empty(&mut self, model: &TypeModel, list: &str) -> CacheResult<()> {
        let type_key = model.type_ref().to_string();
        let (table, list_column) = list_table_for(model.kind);
        let remaining: i64 = self.tx.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE type = ?1 AND {list_column} = ?2"),
            params![type_key, list],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            self.tx.execute(
                "DELETE FROM ranges WHERE type = ?1 AND list_id = ?2",
                params![type_key, list],
            )?;
        }
        Ok(())
    }

    /// Deletes an entire dependent list, its range row included.
    fn delete_dependent_list(&mut self, model: &TypeModel, list: &str) -> CacheResult<()> {
        let type_key = model.type_ref().to_string();
        let (table, list_column) = list_table_for(model.kind);

        let elements: Vec<String> = {
            let mut stmt = self.tx.prepare(&format!(
                "SELECT element_id FROM {table} WHERE type = ?1 AND {list_column} = ?2"
            ))?;
            let rows = stmt.query_map(params![type_key, list], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for element in &elements {
            self.delete_entity(model, Some(list), element)?;
        }

        self.tx.execute(
            "DELETE FROM ranges WHERE type = ?1 AND list_id = ?2",
            params![type_key, list],
        )?;
        Ok(())
    }
}

pub(crate) fn list_table_for(kind: ElementKind) -> (&'static str, &'static str) {
    match kind {
        ElementKind::BlobElement => ("blob_entities", "archive_id"),
        _ => ("list_entities", "list_id"),
    }
}

pub(crate) fn ignore_no_rows<T>(err: rusqlite::Error) -> Result<Option<T>, CacheError> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    }
}
