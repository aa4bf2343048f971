//! Merge push-delivered entities into the live queue at most once.

use std::collections::HashSet;

use crate::models::{EntityKind, PushEvent};
use crate::store::{LiveQueueState, QueueSnapshot};

/// Result of applying one push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    /// Identity already present (typically loaded by a racing bootstrap).
    Duplicate,
}

/// Insert the event's entity at the head of its queue unless its identity is
/// already present. Callers hold the session lock, so the check and the
/// insert cannot interleave with another insert.
pub fn apply(queue: &mut LiveQueueState, event: PushEvent) -> ApplyOutcome {
    if queue.contains(event.kind(), event.id()) {
        return ApplyOutcome::Duplicate;
    }
    match event {
        PushEvent::NewOrder(order) => queue.push_front_order(order),
        PushEvent::StaffCall(call) => queue.push_front_call(call),
    }
    ApplyOutcome::Inserted
}

/// What changed between the current queue and a freshly polled snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub inserted: Vec<(EntityKind, i64)>,
    pub removed: Vec<(EntityKind, i64)>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Polling variant of reconciliation: diff by identity, then replace.
///
/// The queue ends up identical to what `replace` would produce; the diff
/// tells the caller which identities are new (alarm trigger) and which
/// disappeared.
pub fn diff_snapshot(queue: &mut LiveQueueState, snapshot: QueueSnapshot) -> SnapshotDiff {
    let before: HashSet<(EntityKind, i64)> = queue
        .orders()
        .map(|o| (EntityKind::Order, o.id))
        .chain(queue.calls().map(|c| (EntityKind::Call, c.id)))
        .collect();

    queue.replace(snapshot);

    let after: Vec<(EntityKind, i64)> = queue
        .orders()
        .map(|o| (EntityKind::Order, o.id))
        .chain(queue.calls().map(|c| (EntityKind::Call, c.id)))
        .collect();
    let after_set: HashSet<(EntityKind, i64)> = after.iter().copied().collect();

    let inserted = after
        .into_iter()
        .filter(|key| !before.contains(key))
        .collect();
    let mut removed: Vec<(EntityKind, i64)> = before
        .into_iter()
        .filter(|key| !after_set.contains(key))
        .collect();
    removed.sort_by_key(|(kind, id)| (*kind == EntityKind::Call, *id));

    SnapshotDiff { inserted, removed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{call, order};

    #[test]
    fn test_same_identity_applied_many_times_is_stored_once() {
        let mut queue = LiveQueueState::new();
        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(apply(&mut queue, PushEvent::NewOrder(order(11))));
        }

        assert_eq!(outcomes[0], ApplyOutcome::Inserted);
        assert!(outcomes[1..].iter().all(|o| *o == ApplyOutcome::Duplicate));
        assert_eq!(queue.order_count(), 1);
    }

    #[test]
    fn test_inserts_newest_first() {
        let mut queue = LiveQueueState::new();
        apply(&mut queue, PushEvent::NewOrder(order(1)));
        apply(&mut queue, PushEvent::NewOrder(order(2)));
        apply(&mut queue, PushEvent::StaffCall(call(1)));
        apply(&mut queue, PushEvent::StaffCall(call(2)));

        let ids: Vec<i64> = queue.orders().map(|o| o.id).collect();
        assert_eq!(ids, vec![2, 1]);
        let ids: Vec<i64> = queue.calls().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_push_after_bootstrap_of_same_order_is_duplicate() {
        let mut queue = LiveQueueState::new();
        queue.replace(QueueSnapshot {
            orders: vec![order(1)],
            calls: vec![],
        });

        let outcome = apply(&mut queue, PushEvent::NewOrder(order(1)));
        assert_eq!(outcome, ApplyOutcome::Duplicate);
        assert_eq!(queue.snapshot().orders, vec![order(1)]);
    }

    #[test]
    fn test_order_and_call_with_same_id_do_not_collide() {
        let mut queue = LiveQueueState::new();
        assert_eq!(
            apply(&mut queue, PushEvent::NewOrder(order(3))),
            ApplyOutcome::Inserted
        );
        assert_eq!(
            apply(&mut queue, PushEvent::StaffCall(call(3))),
            ApplyOutcome::Inserted
        );
    }

    #[test]
    fn test_diff_snapshot_reports_new_and_gone_identities() {
        let mut queue = LiveQueueState::new();
        queue.replace(QueueSnapshot {
            orders: vec![order(2), order(1)],
            calls: vec![call(1)],
        });

        let diff = diff_snapshot(
            &mut queue,
            QueueSnapshot {
                orders: vec![order(3), order(2)],
                calls: vec![call(1), call(4)],
            },
        );

        assert_eq!(
            diff.inserted,
            vec![(EntityKind::Order, 3), (EntityKind::Call, 4)]
        );
        assert_eq!(diff.removed, vec![(EntityKind::Order, 1)]);
        assert_eq!(queue.order_count(), 2);
        assert_eq!(queue.call_count(), 2);
    }

    #[test]
    fn test_diff_of_identical_snapshot_is_empty() {
        let snapshot = QueueSnapshot {
            orders: vec![order(1)],
            calls: vec![call(2)],
        };
        let mut queue = LiveQueueState::new();
        queue.replace(snapshot.clone());

        assert!(diff_snapshot(&mut queue, snapshot).is_empty());
    }
}
