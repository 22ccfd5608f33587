use satchel_model::TypeRef;
use satchel_pipeline::UntypedInstance;
use satchel_types::{BatchId, ElementId, GeneratedId, GroupId};
use serde::{Deserialize, Serialize};

/// What a batch entry did to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    Create,
    Update,
    Delete,
}

/// One entity mutation inside an event batch.
///
/// `payload` carries the wire form of the entity for creates and updates
/// and is absent for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub type_ref: TypeRef,
    pub operation: BatchOperation,
    pub list_id: Option<GeneratedId>,
    pub element_id: ElementId,
    pub owner_group: GroupId,
    pub payload: Option<UntypedInstance>,
}

/// An ordered slice of the append-only batch log of one group.
///
/// Batch ids are generated ids, so lexicographic order on them is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub batch_id: BatchId,
    pub group_id: GroupId,
    pub updates: Vec<EntityUpdate>,
}

/// A group the caller currently belongs to.
///
/// `initialized` marks memberships whose group row is expected to exist
/// in the cache already. A missing row for an initialized membership is
/// a corrupt replica, while a missing row for a fresh membership just
/// means the group has to be seeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub initialized: bool,
}

impl Membership {
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            initialized: false,
        }
    }

    pub fn initialized(group_id: GroupId) -> Self {
        Self {
            group_id,
            initialized: true,
        }
    }
}
