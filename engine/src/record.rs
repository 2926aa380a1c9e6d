//! The synchronized record type and the per-field bookkeeping the merge
//! engine needs to reconcile concurrent edits deterministically.

use crate::{CollectionName, Hlc, OwnerId, RecordId, VersionVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A data record as committed by the server: identified by `(owner_id,
/// record_id)`, carrying the version vector and server-assigned `op_seq`
/// that make up its causal identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub owner_id: OwnerId,
    pub record_id: RecordId,
    pub collection: CollectionName,
    /// The current payload. Always a JSON object.
    pub payload: serde_json::Value,
    pub version_vector: VersionVector,
    /// Server-assigned, gap-free, monotonic within `owner_id`.
    pub op_seq: u64,
    pub updated_at: Hlc,
    pub tombstone: bool,
    /// Last-writer HLC per scalar/opaque field, used to break LWW ties and
    /// to recognize which fields changed since a given base vector.
    pub field_hlc: BTreeMap<String, Hlc>,
    /// Per-set-field tombstones: canonical JSON string of the removed
    /// element mapped to the HLC of its removal, retained for the grace
    /// window.
    pub set_tombstones: BTreeMap<String, BTreeMap<String, Hlc>>,
    /// Unresolved manual conflicts: field name to the list of competing
    /// candidate values, alongside the provisional value already in `payload`.
    pub conflicts: BTreeMap<String, Vec<serde_json::Value>>,
}

impl Record {
    /// Construct the record produced by a `create` op.
    pub fn new(
        owner_id: impl Into<OwnerId>,
        record_id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        version_vector: VersionVector,
        op_seq: u64,
        updated_at: Hlc,
    ) -> Self {
        let mut field_hlc = BTreeMap::new();
        if let Some(obj) = payload.as_object() {
            for key in obj.keys() {
                field_hlc.insert(key.clone(), updated_at.clone());
            }
        }

        Self {
            owner_id: owner_id.into(),
            record_id: record_id.into(),
            collection: collection.into(),
            payload,
            version_vector,
            op_seq,
            updated_at,
            field_hlc,
            set_tombstones: BTreeMap::new(),
            conflicts: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.tombstone
    }

    /// True if this field currently holds an unresolved manual conflict.
    pub fn has_conflict(&self, field: &str) -> bool {
        self.conflicts.contains_key(field)
    }

    /// Clear a field's conflict once a follow-up op resolves it.
    pub fn clear_conflict(&mut self, field: &str) {
        self.conflicts.remove(field);
    }

    /// Tombstone the record as of a `delete` op.
    pub fn mark_deleted(&mut self, version_vector: VersionVector, op_seq: u64, updated_at: Hlc) {
        self.tombstone = true;
        self.version_vector = version_vector;
        self.op_seq = op_seq;
        self.updated_at = updated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_record_seeds_field_hlc() {
        let vv = VersionVector::single("device-1", 1);
        let hlc = Hlc::new("device-1", 1000);
        let record = Record::new(
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            vv,
            1,
            hlc.clone(),
        );

        assert_eq!(record.record_id, "user-1");
        assert_eq!(record.collection, "users");
        assert_eq!(record.op_seq, 1);
        assert!(!record.tombstone);
        assert!(record.is_active());
        assert_eq!(record.field_hlc.get("name"), Some(&hlc));
    }

    #[test]
    fn mark_deleted_tombstones_and_advances_op_seq() {
        let vv = VersionVector::single("device-1", 1);
        let mut record = Record::new(
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            vv,
            1,
            Hlc::new("device-1", 1000),
        );

        let mut new_vv = VersionVector::single("device-1", 1);
        new_vv.increment("device-1");
        record.mark_deleted(new_vv, 2, Hlc::new("device-1", 2000));

        assert!(record.tombstone);
        assert!(!record.is_active());
        assert_eq!(record.op_seq, 2);
    }

    #[test]
    fn conflict_lifecycle() {
        let vv = VersionVector::single("device-1", 1);
        let mut record = Record::new(
            "owner-1",
            "user-1",
            "notes",
            json!({"summary": "X"}),
            vv,
            1,
            Hlc::new("device-1", 1000),
        );

        assert!(!record.has_conflict("summary"));
        record
            .conflicts
            .insert("summary".to_string(), vec![json!("X"), json!("Y")]);
        assert!(record.has_conflict("summary"));

        record.clear_conflict("summary");
        assert!(!record.has_conflict("summary"));
    }

    #[test]
    fn serialization_roundtrip() {
        let vv = VersionVector::single("device-1", 1);
        let record = Record::new(
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice", "age": 30}),
            vv,
            1,
            Hlc::new("device-1", 1000),
        );

        let json = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();

        assert_eq!(record, parsed);
    }
}
