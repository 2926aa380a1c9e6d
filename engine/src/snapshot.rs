//! Snapshot types for persisting and restoring version-store state.
//!
//! Snapshots are the bridge between the in-memory store and whatever
//! durable storage engine the deployment chooses. `BTreeMap` throughout
//! keeps serialization deterministic regardless of insertion order.

use crate::store::LoggedOp;
use crate::{error::Result, Error, OwnerId, RecordId, Schema, SchemaVersion};
use crate::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One owner's complete durable state: current records plus the full
/// op log that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSnapshot {
    pub records: BTreeMap<RecordId, Record>,
    pub log: Vec<LoggedOp>,
}

/// A point-in-time snapshot of the whole version store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    pub owners: BTreeMap<OwnerId, OwnerSnapshot>,
}

impl StoreSnapshot {
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            owners: BTreeMap::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.owners.values().map(|o| o.records.len()).sum()
    }

    pub fn active_record_count(&self) -> usize {
        self.owners
            .values()
            .flat_map(|o| o.records.values())
            .filter(|r| r.is_active())
            .count()
    }

    /// Validate the snapshot's records against a schema before import.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for owner in self.owners.values() {
            for record in owner.records.values() {
                if !record.is_active() {
                    continue;
                }
                let collection_schema = schema
                    .get_collection(&record.collection)
                    .ok_or_else(|| Error::CollectionNotFound(record.collection.clone()))?;
                collection_schema.validate_payload(&record.payload)?;
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data) — cheap enough to log
/// or expose over a status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    pub owner_count: usize,
    pub record_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            owner_count: snapshot.owners.len(),
            record_count: snapshot.record_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, FieldDef, ValueType};
    use crate::{Hlc, VersionVector};
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1).with_collection(CollectionSchema::new(
            "users",
            vec![
                FieldDef::required("name", ValueType::String),
                FieldDef::optional("age", ValueType::Int),
            ],
        ))
    }

    fn record(id: &str, name: &str) -> Record {
        Record::new(
            "owner-1",
            id,
            "users",
            json!({"name": name}),
            VersionVector::single("d1", 1),
            1,
            Hlc::new("d1", 1000),
        )
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new(1);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.record_count(), 0);
    }

    #[test]
    fn deterministic_serialization_regardless_of_insertion_order() {
        let mut s1 = StoreSnapshot::new(1);
        s1.owners.entry("owner-1".to_string()).or_default().records.insert(
            "user-a".to_string(),
            record("user-a", "Alice"),
        );
        s1.owners.entry("owner-1".to_string()).or_default().records.insert(
            "user-b".to_string(),
            record("user-b", "Bob"),
        );

        let mut s2 = StoreSnapshot::new(1);
        s2.owners.entry("owner-1".to_string()).or_default().records.insert(
            "user-b".to_string(),
            record("user-b", "Bob"),
        );
        s2.owners.entry("owner-1".to_string()).or_default().records.insert(
            "user-a".to_string(),
            record("user-a", "Alice"),
        );

        assert_eq!(s1.to_json().unwrap(), s2.to_json().unwrap());
    }

    #[test]
    fn validate_schema_version_mismatch() {
        let schema = test_schema();
        let snapshot = StoreSnapshot::new(99);
        assert!(matches!(
            snapshot.validate(&schema),
            Err(Error::SchemaVersionMismatch { .. })
        ));
    }

    #[test]
    fn validate_invalid_payload() {
        let schema = test_schema();
        let mut snapshot = StoreSnapshot::new(1);
        let mut bad = record("user-1", "Alice");
        bad.payload = json!({"name": 123});
        snapshot.owners.entry("owner-1".to_string()).or_default().records.insert("user-1".to_string(), bad);

        assert!(matches!(snapshot.validate(&schema), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{"formatVersion": 999, "schemaVersion": 1, "owners": {}}"#;
        assert!(matches!(StoreSnapshot::from_json(json), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn active_record_count_excludes_tombstones() {
        let mut snapshot = StoreSnapshot::new(1);
        let mut tombstoned = record("user-2", "Bob");
        tombstoned.tombstone = true;
        let partition = snapshot.owners.entry("owner-1".to_string()).or_default();
        partition.records.insert("user-1".to_string(), record("user-1", "Alice"));
        partition.records.insert("user-2".to_string(), tombstoned);

        assert_eq!(snapshot.record_count(), 2);
        assert_eq!(snapshot.active_record_count(), 1);
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = StoreSnapshot::new(1);
        snapshot
            .owners
            .entry("owner-1".to_string())
            .or_default()
            .records
            .insert("user-1".to_string(), record("user-1", "Alice"));

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);
    }
}
