//! The offline queue store (C4): a durable per-device queue of operations
//! waiting to be pushed, with supersede/collapse so a long offline window
//! doesn't grow the queue unbounded.
//!
//! Invariant: for each `(device_id, record_id)` the queue holds at most one
//! entry at rest. A new op targeting a record already queued for that device
//! collapses onto the existing entry instead of appending.

use crate::{DeviceId, Operation, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A pending op plus queue bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub op: Operation,
    pub enqueued_at: u64,
    pub attempts: u32,
}

/// Per-device FIFO queues of pending operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStore {
    per_device: HashMap<DeviceId, Vec<QueueEntry>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durable append. If an un-sent op on the same record from the same
    /// device is already queued, collapse onto it in place rather than
    /// growing the queue.
    pub fn enqueue(&mut self, device_id: impl Into<DeviceId>, op: Operation, now: u64) {
        let device_id = device_id.into();
        let entries = self.per_device.entry(device_id).or_default();

        if let Some(existing) = entries.iter_mut().find(|e| e.op.record_id() == op.record_id()) {
            existing.op = collapse(&existing.op, &op);
            return;
        }

        entries.push(QueueEntry {
            op,
            enqueued_at: now,
            attempts: 0,
        });
    }

    /// Ordered by enqueue time; removes all entries for the device on
    /// successful consume (the caller re-enqueues anything it fails to send).
    pub fn drain(&mut self, device_id: &str) -> Vec<QueueEntry> {
        self.per_device.remove(device_id).unwrap_or_default()
    }

    pub fn len(&self, device_id: &str) -> usize {
        self.per_device.get(device_id).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, device_id: &str) -> bool {
        self.len(device_id) == 0
    }

    /// The single queued entry for `(device_id, record_id)`, if any — used to
    /// assert the at-most-one-entry invariant in tests.
    pub fn pending_for(&self, device_id: &str, record_id: &str) -> Option<&QueueEntry> {
        self.per_device
            .get(device_id)
            .and_then(|entries| entries.iter().find(|e| e.op.record_id() == record_id))
    }
}

/// Collapse `incoming` onto `existing`: keep `existing`'s base vector (the
/// state the device knew before *any* of its offline edits landed) and the
/// op id/clock of `incoming` (the latest attempt), merging patch fields with
/// the newer op's values winning — ops from one device arrive in increasing
/// `device_hlc` order, so "newer" is simply "incoming".
fn collapse(existing: &Operation, incoming: &Operation) -> Operation {
    use crate::operation::{DeleteOp, UpdateOp};

    if let Operation::Delete(_) = incoming {
        return Operation::Delete(DeleteOp::new(
            incoming.op_id().clone(),
            incoming.owner_id().clone(),
            incoming.record_id().clone(),
            incoming.collection().clone(),
            existing.base_vector(),
            incoming.device_hlc().clone(),
        ));
    }

    if let Operation::Delete(_) = existing {
        // A write after a queued delete resurrects the record; keep it as-is.
        return incoming.clone();
    }

    let merged_patch = merge_patch_fields(existing.patch(), incoming.patch());

    Operation::Update(UpdateOp::new(
        incoming.op_id().clone(),
        incoming.owner_id().clone(),
        incoming.record_id().clone(),
        incoming.collection().clone(),
        merged_patch,
        existing.base_vector(),
        incoming.device_hlc().clone(),
    ))
}

fn merge_patch_fields(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let mut merged = existing
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(obj) = incoming.and_then(Value::as_object) {
        for (key, value) in obj {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
