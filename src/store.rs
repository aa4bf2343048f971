//! In-memory live queue: pending orders and service calls, newest first.
//!
//! Three write patterns only: full replace (bootstrap), head insert
//! (reconciler) and remove-by-id (completion). Nothing else mutates the
//! collections.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::models::{EntityKind, Order, ServiceCall};

/// Read-only copy of the queue handed to the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub orders: Vec<Order>,
    pub calls: Vec<ServiceCall>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.calls.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct LiveQueueState {
    orders: VecDeque<Order>,
    calls: VecDeque<ServiceCall>,
    bootstrap_in_flight: bool,
    /// Identities completed while a bootstrap fetch was outstanding. The
    /// fetched snapshot may predate the completion, so `replace` drops them.
    tombstones: HashSet<(EntityKind, i64)>,
}

impl LiveQueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn calls(&self) -> impl Iterator<Item = &ServiceCall> {
        self.calls.iter()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.calls.is_empty()
    }

    pub fn contains(&self, kind: EntityKind, id: i64) -> bool {
        match kind {
            EntityKind::Order => self.orders.iter().any(|o| o.id == id),
            EntityKind::Call => self.calls.iter().any(|c| c.id == id),
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            orders: self.orders.iter().cloned().collect(),
            calls: self.calls.iter().cloned().collect(),
        }
    }

    pub(crate) fn push_front_order(&mut self, order: Order) {
        self.orders.push_front(order);
    }

    pub(crate) fn push_front_call(&mut self, call: ServiceCall) {
        self.calls.push_front(call);
    }

    /// Remove by identity. Returns `false` when the id was already absent.
    pub(crate) fn remove(&mut self, kind: EntityKind, id: i64) -> bool {
        if self.bootstrap_in_flight {
            self.tombstones.insert((kind, id));
        }
        match kind {
            EntityKind::Order => {
                let before = self.orders.len();
                self.orders.retain(|o| o.id != id);
                self.orders.len() != before
            }
            EntityKind::Call => {
                let before = self.calls.len();
                self.calls.retain(|c| c.id != id);
                self.calls.len() != before
            }
        }
    }

    /// Mark the start of an authoritative fetch.
    pub(crate) fn begin_bootstrap(&mut self) {
        self.bootstrap_in_flight = true;
        self.tombstones.clear();
    }

    /// Abandon an in-flight fetch without touching the collections.
    pub(crate) fn abort_bootstrap(&mut self) {
        self.bootstrap_in_flight = false;
        self.tombstones.clear();
    }

    /// Replace both collections with a fetched snapshot (not a merge).
    pub(crate) fn replace(&mut self, snapshot: QueueSnapshot) {
        let tombstones = std::mem::take(&mut self.tombstones);
        self.bootstrap_in_flight = false;

        self.orders = dedup_by_id(snapshot.orders, |o| o.id)
            .into_iter()
            .filter(|o| !tombstones.contains(&(EntityKind::Order, o.id)))
            .collect();
        self.calls = dedup_by_id(snapshot.calls, |c| c.id)
            .into_iter()
            .filter(|c| !tombstones.contains(&(EntityKind::Call, c.id)))
            .collect();
    }
}

/// Keep the first occurrence of each id, preserving order.
fn dedup_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> i64) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items.into_iter().filter(|item| seen.insert(id(item))).collect()
}
