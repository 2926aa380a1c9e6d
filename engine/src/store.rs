//! The version store (C2): durable per-owner record state, the owner log,
//! and op-id idempotency.
//!
//! Records are partitioned by `owner_id`. Within an owner, commits are
//! serialized by construction — `commit` takes `&mut self` — and reads
//! against `&self` never block a commit in progress in the caller's own
//! turn, matching the single-writer discipline of the owner partition.

use crate::merge::{self, BaseRelation, MergeOutcome};
use crate::snapshot::{OwnerSnapshot, StoreSnapshot};
use crate::{error::Result, Error, Operation, OperationId, OwnerId, Record, RecordId, Schema};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// One committed entry in an owner's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedOp {
    pub op_seq: u64,
    pub op: Operation,
    pub merged_state_digest: String,
}

/// Result of a successful `commit`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// `op_id` had already committed; this is the prior `op_seq`, not a new commit.
    AlreadyCommitted(u64),
    Committed {
        op_seq: u64,
        record: Record,
        relation: BaseRelation,
        /// Opaque fields a `server_wins` resolver dropped the incoming value for.
        server_won_fields: Vec<String>,
        merged_state_digest: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerPartition {
    records: HashMap<RecordId, Record>,
    log: Vec<LoggedOp>,
    op_index: HashMap<OperationId, u64>,
}

/// The durable version store: one partition per owner, schema-validated commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStore {
    schema: Schema,
    owners: HashMap<OwnerId, OwnerPartition>,
}

impl VersionStore {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            owners: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// `get(owner, record) -> record | not_found`.
    pub fn get(&self, owner: &str, record_id: &str) -> Option<&Record> {
        self.owners.get(owner).and_then(|p| p.records.get(record_id))
    }

    /// All active (non-tombstoned) records for an owner.
    pub fn active_records(&self, owner: &str) -> Vec<&Record> {
        self.owners
            .get(owner)
            .map(|p| p.records.values().filter(|r| r.is_active()).collect())
            .unwrap_or_default()
    }

    /// `head_seq(owner) -> op_seq`. Zero for an owner with no commits yet.
    pub fn head_seq(&self, owner: &str) -> u64 {
        self.owners.get(owner).map(|p| p.log.len() as u64).unwrap_or(0)
    }

    /// `get_since(owner, after_seq, limit) -> [op]`, ascending by `op_seq`.
    pub fn get_since(&self, owner: &str, after_seq: u64, limit: usize) -> Vec<LoggedOp> {
        self.owners
            .get(owner)
            .map(|p| {
                p.log
                    .iter()
                    .filter(|logged| logged.op_seq > after_seq)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `commit(op, merged_state, new_vector) -> op_seq | reject(reason)`.
    ///
    /// Atomic with respect to this store: the record update and the owner-log
    /// append happen together, or neither does. Idempotent: an `op_id` that
    /// has already committed returns its prior `op_seq` without re-applying.
    pub fn commit(&mut self, op: &Operation) -> Result<CommitOutcome> {
        let owner = op.owner_id().clone();
        let partition = self.owners.entry(owner).or_default();

        if let Some(&prior_seq) = partition.op_index.get(op.op_id()) {
            return Ok(CommitOutcome::AlreadyCommitted(prior_seq));
        }

        self.schema.validate_operation(op)?;

        let collection_schema = self
            .schema
            .get_collection(op.collection())
            .ok_or_else(|| Error::CollectionNotFound(op.collection().clone()))?;

        let current = partition.records.get(op.record_id());

        let applied = match merge::reconcile(collection_schema, current, op) {
            MergeOutcome::Applied(applied) => applied,
            MergeOutcome::Rejected(_) => {
                return Err(Error::StaleBase {
                    record_id: op.record_id().clone(),
                })
            }
        };

        let op_seq = partition.log.len() as u64 + 1;

        let record = Record {
            owner_id: op.owner_id().clone(),
            record_id: op.record_id().clone(),
            collection: op.collection().clone(),
            payload: applied.payload,
            version_vector: applied.version_vector,
            op_seq,
            updated_at: op.device_hlc().clone(),
            tombstone: applied.tombstone,
            field_hlc: applied.field_hlc,
            set_tombstones: applied.set_tombstones,
            conflicts: applied.conflicts,
        };

        let digest = merged_state_digest(&record);

        partition.records.insert(record.record_id.clone(), record.clone());
        partition.op_index.insert(op.op_id().clone(), op_seq);
        partition.log.push(LoggedOp {
            op_seq,
            op: op.clone(),
            merged_state_digest: digest.clone(),
        });

        tracing::debug!(
            owner_id = %record.owner_id,
            op_id = %op.op_id(),
            op_seq,
            "committed operation"
        );

        Ok(CommitOutcome::Committed {
            op_seq,
            record,
            relation: applied.relation,
            server_won_fields: applied.server_won_fields,
            merged_state_digest: digest,
        })
    }

    /// Export the entire store as a durable snapshot.
    pub fn export_snapshot(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.schema.version);
        for (owner_id, partition) in &self.owners {
            snapshot.owners.insert(
                owner_id.clone(),
                OwnerSnapshot {
                    records: partition.records.clone().into_iter().collect(),
                    log: partition.log.clone(),
                },
            );
        }
        snapshot
    }

    /// Replace all state with a previously exported snapshot, rebuilding the
    /// `op_index` idempotency lookup from the restored log. Validates the
    /// snapshot against this store's schema first.
    pub fn import_snapshot(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;

        let mut owners = HashMap::with_capacity(snapshot.owners.len());
        for (owner_id, owner_snapshot) in snapshot.owners {
            let mut op_index = HashMap::with_capacity(owner_snapshot.log.len());
            for logged in &owner_snapshot.log {
                op_index.insert(logged.op.op_id().clone(), logged.op_seq);
            }
            owners.insert(
                owner_id,
                OwnerPartition {
                    records: owner_snapshot.records.into_iter().collect(),
                    log: owner_snapshot.log,
                    op_index,
                },
            );
        }
        self.owners = owners;
        Ok(())
    }
}

/// A stable digest of a record's merged state, used to let devices detect
/// whether they already hold the state a `DELIVER` frame announces.
fn merged_state_digest(record: &Record) -> String {
    let canonical = serde_json::to_string(&(&record.payload, &record.version_vector, record.tombstone))
        .unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CreateOp, UpdateOp};
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

    #[test]
    fn commit_create_assigns_seq_one() {
        let mut store = VersionStore::new(test_schema());
        let op = Operation::Create(CreateOp::new(
            OperationId::new("d1", 1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            Hlc::new("d1", 1000),
        ));

        match store.commit(&op).unwrap() {
            CommitOutcome::Committed { op_seq, record, .. } => {
                assert_eq!(op_seq, 1);
                assert_eq!(record.payload["name"], json!("Alice"));
            }
            _ => panic!("expected a fresh commit"),
        }
        assert_eq!(store.head_seq("owner-1"), 1);
    }

    #[test]
    fn idempotent_replay_returns_same_seq() {
        let mut store = VersionStore::new(test_schema());
        let op = Operation::Create(CreateOp::new(
            OperationId::new("d1", 1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            Hlc::new("d1", 1000),
        ));

        let first = store.commit(&op).unwrap();
        let second = store.commit(&op).unwrap();

        let CommitOutcome::Committed { op_seq: seq1, .. } = first else {
            panic!("expected commit")
        };
        assert_eq!(second, CommitOutcome::AlreadyCommitted(seq1));
        assert_eq!(store.head_seq("owner-1"), 1);
    }

    #[test]
    fn stale_base_is_rejected_with_error() {
        let mut store = VersionStore::new(test_schema());
        let create = Operation::Create(CreateOp::new(
            OperationId::new("d1", 1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            Hlc::new("d1", 1000),
        ));
        store.commit(&create).unwrap();

        // A base vector claiming more progress than the store has actually
        // committed (d1 at 5, when only 1 has landed) dominates current state
        // and is rejected as stale rather than silently accepted.
        let stale = Operation::Update(UpdateOp::new(
            OperationId::new("d2", 1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Carol"}),
            VersionVector::single("d1", 5),
            Hlc::new("d2", 2500),
        ));

        let result = store.commit(&stale);
        assert!(matches!(result, Err(Error::StaleBase { .. })));
    }

    #[test]
    fn get_since_is_ascending_and_respects_limit() {
        let mut store = VersionStore::new(test_schema());
        store
            .commit(&Operation::Create(CreateOp::new(
                OperationId::new("d1", 1),
                "owner-1",
                "user-1",
                "users",
                json!({"name": "Alice"}),
                Hlc::new("d1", 1000),
            )))
            .unwrap();
        store
            .commit(&Operation::Create(CreateOp::new(
                OperationId::new("d1", 2),
                "owner-1",
                "user-2",
                "users",
                json!({"name": "Bob"}),
                Hlc::new("d1", 1100),
            )))
            .unwrap();
        store
            .commit(&Operation::Create(CreateOp::new(
                OperationId::new("d1", 3),
                "owner-1",
                "user-3",
                "users",
                json!({"name": "Carol"}),
                Hlc::new("d1", 1200),
            )))
            .unwrap();

        let tail = store.get_since("owner-1", 1, 10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].op_seq, 2);
        assert_eq!(tail[1].op_seq, 3);

        let limited = store.get_since("owner-1", 0, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].op_seq, 1);
    }

    #[test]
    fn owners_are_independent_partitions() {
        let mut store = VersionStore::new(test_schema());
        store
            .commit(&Operation::Create(CreateOp::new(
                OperationId::new("d1", 1),
                "owner-1",
                "user-1",
                "users",
                json!({"name": "Alice"}),
                Hlc::new("d1", 1000),
            )))
            .unwrap();
        store
            .commit(&Operation::Create(CreateOp::new(
                OperationId::new("d1", 1),
                "owner-2",
                "user-1",
                "users",
                json!({"name": "Eve"}),
                Hlc::new("d1", 1000),
            )))
            .unwrap();

        assert_eq!(store.head_seq("owner-1"), 1);
        assert_eq!(store.head_seq("owner-2"), 1);
        assert_eq!(store.get("owner-1", "user-1").unwrap().payload["name"], json!("Alice"));
        assert_eq!(store.get("owner-2", "user-1").unwrap().payload["name"], json!("Eve"));
    }

    #[test]
    fn unknown_collection_errors() {
        let mut store = VersionStore::new(test_schema());
        let op = Operation::Create(CreateOp::new(
            OperationId::new("d1", 1),
            "owner-1",
            "post-1",
            "posts",
            json!({"title": "Hello"}),
            Hlc::new("d1", 1000),
        ));

        assert!(matches!(store.commit(&op), Err(Error::CollectionNotFound(_))));
    }

    #[test]
    fn active_records_excludes_tombstones() {
        let mut store = VersionStore::new(test_schema());
        store
            .commit(&Operation::Create(CreateOp::new(
                OperationId::new("d1", 1),
                "owner-1",
                "user-1",
                "users",
                json!({"name": "Alice"}),
                Hlc::new("d1", 1000),
            )))
            .unwrap();
        store
            .commit(&Operation::Delete(crate::operation::DeleteOp::new(
                OperationId::new("d1", 2),
                "owner-1",
                "user-1",
                "users",
                VersionVector::single("d1", 1),
                Hlc::new("d1", 2000),
            )))
            .unwrap();

        assert!(store.active_records("owner-1").is_empty());
        assert!(store.get("owner-1", "user-1").unwrap().tombstone);
    }

    #[test]
    fn snapshot_roundtrip_preserves_state_and_idempotency() {
        let mut store = VersionStore::new(test_schema());
        let op = Operation::Create(CreateOp::new(
            OperationId::new("d1", 1),
            "owner-1",
            "user-1",
            "users",
            json!({"name": "Alice"}),
            Hlc::new("d1", 1000),
        ));
        store.commit(&op).unwrap();

        let snapshot = store.export_snapshot();

        let mut restored = VersionStore::new(test_schema());
        restored.import_snapshot(snapshot).unwrap();

        assert_eq!(restored.get("owner-1", "user-1"), store.get("owner-1", "user-1"));
        assert_eq!(restored.head_seq("owner-1"), 1);

        // Re-submitting the same op against the restored store is still idempotent.
        assert_eq!(restored.commit(&op).unwrap(), CommitOutcome::AlreadyCommitted(1));
    }

    #[test]
    fn import_rejects_schema_version_mismatch() {
        let mut store = VersionStore::new(Schema::new(2));
        let snapshot = StoreSnapshot::new(1);
        assert!(matches!(
            store.import_snapshot(snapshot),
            Err(Error::SchemaVersionMismatch { .. })
        ));
    }
}
