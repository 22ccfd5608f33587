//! Stored entity representation.

use satchel_model::{IdKind, TypeModel, TypeRef};
use satchel_pipeline::UntypedInstance;
use satchel_types::{CustomId, ElementId, GeneratedId, GroupId, IdTuple};

/// One cached entity in wire form.
///
/// `list_id` is the list id for list elements, the archive id for blob
/// elements, and `None` for singleton elements.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub type_ref: TypeRef,
    pub list_id: Option<GeneratedId>,
    pub element_id: ElementId,
    pub owner_group: GroupId,
    pub payload: UntypedInstance,
}

impl StoredEntity {
    /// The (list id, element id) tuple, for list and blob elements.
    #[must_use]
    pub fn id_tuple(&self) -> Option<IdTuple> {
        self.list_id
            .as_ref()
            .map(|list| IdTuple::new(list.clone(), self.element_id.clone()))
    }
}

/// Rebuilds an element id from its stored canonical encoding, using the
/// type's id kind.
pub(crate) fn element_id_from_canonical(model: &TypeModel, raw: &str) -> ElementId {
    match model.id_kind() {
        IdKind::Generated => match GeneratedId::parse(raw) {
            Ok(id) => ElementId::Generated(id),
            Err(_) => ElementId::Custom(CustomId::new(raw)),
        },
        IdKind::Custom => ElementId::Custom(CustomId::new(raw)),
    }
}
