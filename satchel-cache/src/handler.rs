//! Per-type cache mutation hooks.
//!
//! A handler observes mutations of one type before they hit the
//! database: search indexers drop index rows for deleted entities, view
//! counters invalidate, and so on. Handlers see the pre-mutation state;
//! an error from a handler aborts the mutation.

use crate::entity::StoredEntity;
use crate::error::CacheResult;
use satchel_model::TypeRef;
use satchel_types::{ElementId, GeneratedId};
use std::collections::HashMap;
use std::sync::Arc;

pub trait CacheHandler: Send + Sync {
    /// Called before an entity is inserted or replaced.
    fn on_before_cache_update(&self, entity: &StoredEntity) -> CacheResult<()> {
        let _ = entity;
        Ok(())
    }

    /// Called before an entity row is removed, on every deletion path
    /// including eviction and bulk deletes.
    fn on_before_cache_deletion(
        &self,
        type_ref: &TypeRef,
        list_id: Option<&GeneratedId>,
        element_id: &ElementId,
    ) -> CacheResult<()> {
        let _ = (type_ref, list_id, element_id);
        Ok(())
    }
}

/// Handler registry, one handler per type.
#[derive(Default, Clone)]
pub struct CacheHandlerMap {
    handlers: HashMap<TypeRef, Arc<dyn CacheHandler>>,
}

impl CacheHandlerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_ref: TypeRef, handler: Arc<dyn CacheHandler>) {
        self.handlers.insert(type_ref, handler);
    }

    #[must_use]
    pub fn get(&self, type_ref: &TypeRef) -> Option<&Arc<dyn CacheHandler>> {
        self.handlers.get(type_ref)
    }
}
