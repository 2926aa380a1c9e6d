//! Operation types: the atomic, idempotent unit of change a device proposes.
//!
//! Changes are expressed as operations, never direct mutations, so the
//! engine can reconcile concurrent edits from multiple devices against a
//! shared op log.

use crate::{CollectionName, DeviceId, Hlc, OwnerId, RecordId, VersionVector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an operation forever: the authoring device and that device's
/// local sequence number. Re-submission of the same id is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationId {
    pub device_id: DeviceId,
    pub device_seq: u64,
}

impl OperationId {
    pub fn new(device_id: impl Into<DeviceId>, device_seq: u64) -> Self {
        Self {
            device_id: device_id.into(),
            device_seq,
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.device_seq)
    }
}

/// A create operation: the first write to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    pub op_id: OperationId,
    pub owner_id: OwnerId,
    pub record_id: RecordId,
    pub collection: CollectionName,
    pub payload: serde_json::Value,
    pub device_hlc: Hlc,
}

/// An update operation: a patch applied against a known base version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOp {
    pub op_id: OperationId,
    pub owner_id: OwnerId,
    pub record_id: RecordId,
    pub collection: CollectionName,
    /// Patch fields only — scalars hold the new value, counters hold a
    /// signed delta, sets hold `{"add": [...], "remove": [...]}`.
    pub patch: serde_json::Value,
    pub base_vector: VersionVector,
    pub device_hlc: Hlc,
}

/// A delete operation: tombstones the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOp {
    pub op_id: OperationId,
    pub owner_id: OwnerId,
    pub record_id: RecordId,
    pub collection: CollectionName,
    pub base_vector: VersionVector,
    pub device_hlc: Hlc,
}

/// An operation that can be proposed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Create(CreateOp),
    Update(UpdateOp),
    Delete(DeleteOp),
}

impl Operation {
    pub fn op_id(&self) -> &OperationId {
        match self {
            Operation::Create(op) => &op.op_id,
            Operation::Update(op) => &op.op_id,
            Operation::Delete(op) => &op.op_id,
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        match self {
            Operation::Create(op) => &op.owner_id,
            Operation::Update(op) => &op.owner_id,
            Operation::Delete(op) => &op.owner_id,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        match self {
            Operation::Create(op) => &op.record_id,
            Operation::Update(op) => &op.record_id,
            Operation::Delete(op) => &op.record_id,
        }
    }

    pub fn collection(&self) -> &CollectionName {
        match self {
            Operation::Create(op) => &op.collection,
            Operation::Update(op) => &op.collection,
            Operation::Delete(op) => &op.collection,
        }
    }

    pub fn device_hlc(&self) -> &Hlc {
        match self {
            Operation::Create(op) => &op.device_hlc,
            Operation::Update(op) => &op.device_hlc,
            Operation::Delete(op) => &op.device_hlc,
        }
    }

    /// The version vector the device believed current when it authored this
    /// op. A `Create` has no predecessor, so this is the empty vector.
    pub fn base_vector(&self) -> VersionVector {
        match self {
            Operation::Create(_) => VersionVector::new(),
            Operation::Update(op) => op.base_vector.clone(),
            Operation::Delete(op) => op.base_vector.clone(),
        }
    }

    /// The patch fields this op carries, if any (deletes carry none).
    pub fn patch(&self) -> Option<&serde_json::Value> {
        match self {
            Operation::Create(op) => Some(&op.payload),
            Operation::Update(op) => Some(&op.patch),
            Operation::Delete(_) => None,
        }
    }
}

impl CreateOp {
    pub fn new(
        op_id: OperationId,
        owner_id: impl Into<OwnerId>,
        record_id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        device_hlc: Hlc,
    ) -> Self {
        Self {
            op_id,
            owner_id: owner_id.into(),
            record_id: record_id.into(),
            collection: collection.into(),
            payload,
            device_hlc,
        }
    }
}

impl UpdateOp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        op_id: OperationId,
        owner_id: impl Into<OwnerId>,
        record_id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        patch: serde_json::Value,
        base_vector: VersionVector,
        device_hlc: Hlc,
    ) -> Self {
        Self {
            op_id,
            owner_id: owner_id.into(),
            record_id: record_id.into(),
            collection: collection.into(),
            patch,
            base_vector,
            device_hlc,
        }
    }
}

impl DeleteOp {
    pub fn new(
        op_id: OperationId,
        owner_id: impl Into<OwnerId>,
        record_id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        base_vector: VersionVector,
        device_hlc: Hlc,
    ) -> Self {
        Self {
            op_id,
            owner_id: owner_id.into(),
            record_id: record_id.into(),
            collection: collection.into(),
            base_vector,
            device_hlc,
        }
    }
}

/// Operations are ordered by device HLC, then op id, for deterministic
/// replay order when sorting a batch before commit.
impl Ord for Operation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.device_hlc().cmp(other.device_hlc()) {
            std::cmp::Ordering::Equal => self.op_id().cmp(other.op_id()),
            other => other,
        }
    }
}

impl PartialOrd for Operation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Operation {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op_id(seq: u64) -> OperationId {
        OperationId::new("device-1", seq)
    }

    #[test]
    fn create_op() {
        let op = CreateOp::new(
            op_id(1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            Hlc::new("device-1", 1000),
        );

        assert_eq!(op.op_id, op_id(1));
        assert_eq!(op.record_id, "user-1");
        assert_eq!(op.collection, "users");
    }

    #[test]
    fn update_op_carries_base_vector() {
        let op = UpdateOp::new(
            op_id(2),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice Smith"}),
            VersionVector::single("device-1", 1),
            Hlc::new("device-1", 2000),
        );

        assert_eq!(op.base_vector.get("device-1"), 1);
    }

    #[test]
    fn delete_op() {
        let op = DeleteOp::new(
            op_id(3),
            "owner-1",
            "user-1",
            "users",
            VersionVector::single("device-1", 2),
            Hlc::new("device-1", 3000),
        );

        assert_eq!(op.base_vector.get("device-1"), 2);
    }

    #[test]
    fn operation_accessors() {
        let create = Operation::Create(CreateOp::new(
            op_id(1),
            "owner-1",
            "user-1",
            "users",
            json!({}),
            Hlc::new("device-1", 1000),
        ));

        assert_eq!(create.op_id(), &op_id(1));
        assert_eq!(create.owner_id(), "owner-1");
        assert_eq!(create.record_id(), "user-1");
        assert_eq!(create.collection(), "users");
        assert!(create.base_vector().is_empty());
    }

    #[test]
    fn operation_ordering_by_hlc() {
        let op1 = Operation::Create(CreateOp::new(
            op_id(1),
            "owner-1",
            "r1",
            "c",
            json!({}),
            Hlc::new("device-1", 1000),
        ));
        let op2 = Operation::Create(CreateOp::new(
            op_id(2),
            "owner-1",
            "r2",
            "c",
            json!({}),
            Hlc::new("device-1", 2000),
        ));

        assert!(op1 < op2);
    }

    #[test]
    fn operation_ordering_same_hlc_falls_back_to_op_id() {
        let hlc = Hlc::new("device-1", 1000);
        let op1 = Operation::Create(CreateOp::new(
            op_id(1),
            "owner-1",
            "r1",
            "c",
            json!({}),
            hlc.clone(),
        ));
        let op2 = Operation::Create(CreateOp::new(op_id(2), "owner-1", "r2", "c", json!({}), hlc));

        assert!(op1 < op2);
    }

    #[test]
    fn operation_id_display() {
        assert_eq!(op_id(7).to_string(), "device-1:7");
    }

    #[test]
    fn serialization_create() {
        let op = Operation::Create(CreateOp::new(
            op_id(1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            Hlc::new("device-1", 1000),
        ));

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"create\""));

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn serialization_update() {
        let op = Operation::Update(UpdateOp::new(
            op_id(2),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Bob"}),
            VersionVector::single("device-1", 1),
            Hlc::new("device-1", 2000),
        ));

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"update\""));

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn serialization_delete() {
        let op = Operation::Delete(DeleteOp::new(
            op_id(3),
            "owner-1",
            "user-1",
            "users",
            VersionVector::single("device-1", 2),
            Hlc::new("device-1", 3000),
        ));

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"delete\""));

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }
}
