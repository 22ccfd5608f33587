use std::collections::{HashMap, VecDeque};

use satchel_types::{BatchId, GroupId};

use crate::protocol::EventBatch;

/// Holds realtime batches back while catch-up is running.
///
/// Realtime pushes can race the catch-up download, so the queue starts
/// paused. On resume every buffered batch whose id is not strictly
/// newer than its group's floor is a duplicate of something catch-up
/// already applied and gets discarded.
#[derive(Debug)]
pub(crate) struct RealtimeQueue {
    paused: bool,
    pending: VecDeque<EventBatch>,
}

impl RealtimeQueue {
    pub(crate) fn new() -> Self {
        Self {
            paused: true,
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Buffers `batch` while paused. When running, hands the batch back
    /// for immediate dispatch.
    pub(crate) fn offer(&mut self, batch: EventBatch) -> Option<EventBatch> {
        if self.paused {
            self.pending.push_back(batch);
            None
        } else {
            Some(batch)
        }
    }

    /// Unpauses and drains the buffer, dropping batches at or below the
    /// per-group floor.
    pub(crate) fn resume(&mut self, floors: &HashMap<GroupId, BatchId>) -> Vec<EventBatch> {
        self.paused = false;
        self.pending
            .drain(..)
            .filter(|batch| match floors.get(&batch.group_id) {
                Some(floor) => batch.batch_id > *floor,
                None => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_types::GeneratedId;

    fn batch(group: &GroupId, id: &BatchId) -> EventBatch {
        EventBatch {
            batch_id: id.clone(),
            group_id: group.clone(),
            updates: Vec::new(),
        }
    }

    #[test]
    fn buffers_while_paused_and_passes_through_when_running() {
        let group = GeneratedId::new();
        let id = GeneratedId::new();
        let mut queue = RealtimeQueue::new();

        assert!(queue.offer(batch(&group, &id)).is_none());
        let released = queue.resume(&HashMap::new());
        assert_eq!(released.len(), 1);

        assert!(queue.offer(batch(&group, &id)).is_some());
    }

    #[test]
    fn resume_drops_batches_at_or_below_the_floor() {
        let group = GeneratedId::new();
        let older = GeneratedId::from_timestamp(satchel_types::Timestamp::from_millis(1_000), 0);
        let floor = GeneratedId::from_timestamp(satchel_types::Timestamp::from_millis(2_000), 0);
        let newer = GeneratedId::from_timestamp(satchel_types::Timestamp::from_millis(3_000), 0);

        let mut queue = RealtimeQueue::new();
        queue.offer(batch(&group, &older));
        queue.offer(batch(&group, &floor));
        queue.offer(batch(&group, &newer));

        let mut floors = HashMap::new();
        floors.insert(group.clone(), floor);
        let released = queue.resume(&floors);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].batch_id, newer);
    }
}
