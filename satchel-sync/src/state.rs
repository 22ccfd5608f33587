use std::collections::HashMap;

use satchel_types::{BatchId, GroupId};

/// Where a tracked group is in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPhase {
    /// No catch-up has run for the group yet.
    #[default]
    Uninitialized,
    /// Catch-up is downloading and applying missed batches.
    CatchingUp,
    /// The group is current and realtime batches apply directly.
    Steady,
}

/// In-memory engine state, rebuilt from the cache on every start.
#[derive(Debug, Default)]
pub(crate) struct SyncState {
    phases: HashMap<GroupId, GroupPhase>,
    floors: HashMap<GroupId, BatchId>,
}

impl SyncState {
    pub(crate) fn phase(&self, group: &GroupId) -> GroupPhase {
        self.phases.get(group).copied().unwrap_or_default()
    }

    pub(crate) fn set_phase(&mut self, group: &GroupId, phase: GroupPhase) {
        self.phases.insert(group.clone(), phase);
    }

    /// The newest batch id applied for `group` in this session.
    pub(crate) fn floor(&self, group: &GroupId) -> Option<&BatchId> {
        self.floors.get(group)
    }

    pub(crate) fn floors(&self) -> &HashMap<GroupId, BatchId> {
        &self.floors
    }

    /// Moves the floor up; an older id never lowers it.
    pub(crate) fn raise_floor(&mut self, group: &GroupId, id: &BatchId) {
        match self.floors.get(group) {
            Some(current) if *current >= *id => {}
            _ => {
                self.floors.insert(group.clone(), id.clone());
            }
        }
    }

    pub(crate) fn forget(&mut self, group: &GroupId) {
        self.phases.remove(group);
        self.floors.remove(group);
    }
}
