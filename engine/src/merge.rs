//! The merge engine (C3): three-way merge, conflict classification, and
//! resolver strategies.
//!
//! Given the currently committed state `S` and an incoming operation `O`,
//! `reconcile` classifies the relationship between `O`'s base vector and
//! `S`'s version vector, then applies a deterministic field-level policy.
//! The same `(S, O)` pair always yields the same output — no wall-clock
//! reads, no randomness — which is what lets every replica converge.

use crate::schema::{CollectionSchema, MergeKind, ResolverStrategy};
use crate::vector::VectorOrdering;
use crate::{Hlc, Operation, Record, VersionVector};
use serde_json::Value;
use std::collections::BTreeMap;

/// Where an incoming op's base vector sits relative to the currently
/// committed version vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseRelation {
    /// `base >= current`: the device has already seen everything the
    /// server has. Nothing new to apply.
    NoProgress,
    /// `base == current`: no one else has written since the device last
    /// synced. Apply the patch verbatim.
    FastPath,
    /// `base < current`: the server has moved on without the device.
    /// Re-apply the patch on top of current state field-by-field.
    Rebase,
    /// `base` and `current` are incomparable: genuine concurrent edits.
    Concurrent,
}

/// Classify `op.base_vector()` against `current`.
pub fn classify(base: &VersionVector, current: &VersionVector) -> BaseRelation {
    match base.compare(current) {
        VectorOrdering::Equal => BaseRelation::FastPath,
        VectorOrdering::Greater => BaseRelation::NoProgress,
        VectorOrdering::Less => BaseRelation::Rebase,
        VectorOrdering::Concurrent => BaseRelation::Concurrent,
    }
}

/// Result of reconciling one operation against one record's current state.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The op was applied; `record` is not yet committed — the caller
    /// (the sync orchestrator) still owns assigning `op_seq` and persisting.
    Applied(AppliedMerge),
    /// `base >= current`: nothing to do. The caller must check the op log
    /// for idempotent replay before treating this as an error.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMerge {
    pub relation: BaseRelation,
    pub payload: Value,
    pub version_vector: VersionVector,
    pub field_hlc: BTreeMap<String, Hlc>,
    pub set_tombstones: BTreeMap<String, BTreeMap<String, Hlc>>,
    pub conflicts: BTreeMap<String, Vec<Value>>,
    pub tombstone: bool,
    /// Fields where a `server_wins` resolver dropped the incoming value —
    /// the orchestrator emits an "op rejected" notice to the origin device
    /// for each of these.
    pub server_won_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    StaleBase,
}

/// Reconcile operation `op` against the currently committed `current` state
/// (`None` if this is the record's first write).
pub fn reconcile(schema: &CollectionSchema, current: Option<&Record>, op: &Operation) -> MergeOutcome {
    let base = op.base_vector();
    let current_vector = current
        .map(|r| r.version_vector.clone())
        .unwrap_or_else(VersionVector::new);

    let relation = if current.is_none() {
        // A record's first write always applies; there is nothing to be stale against.
        BaseRelation::FastPath
    } else {
        classify(&base, &current_vector)
    };

    if relation == BaseRelation::NoProgress {
        return MergeOutcome::Rejected(RejectReason::StaleBase);
    }

    let device_id = op.op_id().device_id.clone();
    let device_seq = op.op_id().device_seq;
    let mut new_vector = current_vector;
    new_vector.observe(device_id, device_seq);

    if let Operation::Delete(_) = op {
        let mut field_hlc = current.map(|r| r.field_hlc.clone()).unwrap_or_default();
        for hlc in field_hlc.values_mut() {
            *hlc = op.device_hlc().clone();
        }
        return MergeOutcome::Applied(AppliedMerge {
            relation,
            payload: current.map(|r| r.payload.clone()).unwrap_or(Value::Null),
            version_vector: new_vector,
            field_hlc,
            set_tombstones: current.map(|r| r.set_tombstones.clone()).unwrap_or_default(),
            conflicts: current.map(|r| r.conflicts.clone()).unwrap_or_default(),
            tombstone: true,
            server_won_fields: Vec::new(),
        });
    }

    let mut payload = current
        .map(|r| r.payload.clone())
        .unwrap_or_else(|| Value::Object(Default::default()));
    let mut field_hlc = current.map(|r| r.field_hlc.clone()).unwrap_or_default();
    let mut set_tombstones = current.map(|r| r.set_tombstones.clone()).unwrap_or_default();
    let mut conflicts = current.map(|r| r.conflicts.clone()).unwrap_or_default();
    let mut server_won_fields = Vec::new();

    let patch = op.patch().and_then(Value::as_object).cloned().unwrap_or_default();
    let payload_obj = payload.as_object_mut().expect("record payload is always an object");

    for (field_name, incoming) in patch.iter() {
        let merge_kind = schema
            .field(field_name)
            .map(|f| f.merge)
            .unwrap_or(MergeKind::Scalar);

        match merge_kind {
            MergeKind::Scalar => {
                apply_scalar(payload_obj, &mut field_hlc, field_name, incoming, op.device_hlc());
            }
            MergeKind::Set => {
                apply_set(
                    payload_obj,
                    &mut set_tombstones,
                    field_name,
                    incoming,
                    op.device_hlc(),
                );
            }
            MergeKind::Counter => {
                apply_counter(payload_obj, field_name, incoming);
            }
            MergeKind::Opaque => {
                apply_opaque(
                    payload_obj,
                    &mut field_hlc,
                    &mut conflicts,
                    &mut server_won_fields,
                    field_name,
                    incoming,
                    op.device_hlc(),
                    schema.resolver,
                );
            }
        }
    }

    MergeOutcome::Applied(AppliedMerge {
        relation,
        payload,
        version_vector: new_vector,
        field_hlc,
        set_tombstones,
        conflicts,
        tombstone: false,
        server_won_fields,
    })
}

/// Last-writer-wins by HLC, ties broken by device id (already encoded in `Hlc`'s `Ord`).
fn apply_scalar(
    payload: &mut serde_json::Map<String, Value>,
    field_hlc: &mut BTreeMap<String, Hlc>,
    field_name: &str,
    incoming: &Value,
    device_hlc: &Hlc,
) {
    let newer = match field_hlc.get(field_name) {
        Some(existing) => device_hlc > existing,
        None => true,
    };
    if newer {
        payload.insert(field_name.to_string(), incoming.clone());
        field_hlc.insert(field_name.to_string(), device_hlc.clone());
    }
}

/// `incoming` is `{"add": [...], "remove": [...]}`. Removed elements become
/// tombstones rather than disappearing outright.
fn apply_set(
    payload: &mut serde_json::Map<String, Value>,
    set_tombstones: &mut BTreeMap<String, BTreeMap<String, Hlc>>,
    field_name: &str,
    incoming: &Value,
    device_hlc: &Hlc,
) {
    let add = incoming.get("add").and_then(Value::as_array).cloned().unwrap_or_default();
    let remove = incoming
        .get("remove")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut current: Vec<Value> = payload
        .get(field_name)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let tombstones = set_tombstones.entry(field_name.to_string()).or_default();

    for element in remove {
        let key = canonical_key(&element);
        if !tombstones.contains_key(&key) || tombstones.get(&key).is_some_and(|h| device_hlc > h) {
            tombstones.insert(key, device_hlc.clone());
        }
        current.retain(|v| canonical_key(v) != canonical_key(&element));
    }

    for element in add {
        let key = canonical_key(&element);
        let tombstoned = tombstones.get(&key).is_some_and(|h| h > device_hlc);
        if !tombstoned && !current.iter().any(|v| canonical_key(v) == key) {
            current.push(element);
        }
    }

    payload.insert(field_name.to_string(), Value::Array(current));
}

fn canonical_key(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// `new = base + sum(concurrent deltas)`. `incoming` is the signed delta.
fn apply_counter(payload: &mut serde_json::Map<String, Value>, field_name: &str, incoming: &Value) {
    let delta = incoming.as_i64().unwrap_or(0);
    let current = payload.get(field_name).and_then(Value::as_i64).unwrap_or(0);
    payload.insert(field_name.to_string(), Value::from(current.saturating_add(delta)));
}

/// No automatic merge; first write always applies, any later concurrent
/// write is resolved per the collection's `ResolverStrategy`.
#[allow(clippy::too_many_arguments)]
fn apply_opaque(
    payload: &mut serde_json::Map<String, Value>,
    field_hlc: &mut BTreeMap<String, Hlc>,
    conflicts: &mut BTreeMap<String, Vec<Value>>,
    server_won_fields: &mut Vec<String>,
    field_name: &str,
    incoming: &Value,
    device_hlc: &Hlc,
    resolver: ResolverStrategy,
) {
    let already_written = field_hlc.contains_key(field_name);

    if !already_written {
        payload.insert(field_name.to_string(), incoming.clone());
        field_hlc.insert(field_name.to_string(), device_hlc.clone());
        return;
    }

    match resolver {
        ResolverStrategy::ServerWins => {
            server_won_fields.push(field_name.to_string());
        }
        ResolverStrategy::ClientWins => {
            payload.insert(field_name.to_string(), incoming.clone());
            field_hlc.insert(field_name.to_string(), device_hlc.clone());
            conflicts.remove(field_name);
        }
        ResolverStrategy::Manual => {
            let current_value = payload.get(field_name).cloned().unwrap_or(Value::Null);
            conflicts
                .entry(field_name.to_string())
                .or_insert_with(|| vec![current_value])
                .push(incoming.clone());
            payload.insert(field_name.to_string(), incoming.clone());
            field_hlc.insert(field_name.to_string(), device_hlc.clone());
        }
    }
}
