//! The sync orchestrator (C5): ingress `push`/`pull`, wiring the version
//! store, merge engine, and pub/sub bus together per owner.
//!
//! One conceptual instance serializes commit work for a given `owner_id`;
//! this type itself holds no threads or locks — callers that need per-owner
//! concurrency wrap it in whatever task/actor model their runtime prefers.
//! Here it exposes the pure commit/publish logic so that behavior is
//! testable without any transport.

use crate::bus::Bus;
use crate::store::{CommitOutcome, LoggedOp, VersionStore};
use crate::{Error, Operation, OperationId, Schema};

/// Outcome of pushing a single op, as returned to the authoring device in a
/// `PUSH_RESULT` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PushResult {
    Committed(u64),
    AlreadyCommitted(u64),
    Rejected(Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushAck {
    pub op_id: OperationId,
    pub result: PushResult,
}

/// Ties the version store to the owner-scoped broadcast topic.
pub struct SyncOrchestrator {
    store: VersionStore,
    bus: Bus<LoggedOp>,
}

impl SyncOrchestrator {
    pub fn new(schema: Schema) -> Self {
        Self {
            store: VersionStore::new(schema),
            bus: Bus::new(),
        }
    }

    /// Build an orchestrator around an already-populated store, e.g. one
    /// restored from a durable snapshot at startup.
    pub fn from_store(store: VersionStore) -> Self {
        Self { store, bus: Bus::new() }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn bus_mut(&mut self) -> &mut Bus<LoggedOp> {
        &mut self.bus
    }

    /// `push(ops[])`: best-effort batch, applied strictly in the order given
    /// (the order the authoring device sent them). Each op is independent —
    /// one rejection does not stop the rest of the batch.
    pub fn push(&mut self, ops: &[Operation]) -> Vec<PushAck> {
        ops.iter().map(|op| self.push_one(op)).collect()
    }

    fn push_one(&mut self, op: &Operation) -> PushAck {
        let op_id = op.op_id().clone();

        match self.store.commit(op) {
            Ok(CommitOutcome::AlreadyCommitted(op_seq)) => PushAck {
                op_id,
                result: PushResult::AlreadyCommitted(op_seq),
            },
            Ok(CommitOutcome::Committed {
                op_seq,
                merged_state_digest,
                ..
            }) => {
                self.bus.publish(
                    op.owner_id(),
                    LoggedOp {
                        op_seq,
                        op: op.clone(),
                        merged_state_digest,
                    },
                );
                PushAck {
                    op_id,
                    result: PushResult::Committed(op_seq),
                }
            }
            Err(err) => {
                tracing::warn!(owner_id = %op.owner_id(), op_id = %op_id, error = %err, "op rejected");
                PushAck {
                    op_id,
                    result: PushResult::Rejected(err),
                }
            }
        }
    }

    /// `pull(since_seq, limit) -> [op]`, read straight through the version store.
    pub fn pull(&self, owner_id: &str, since_seq: u64, limit: usize) -> Vec<LoggedOp> {
        self.store.get_since(owner_id, since_seq, limit)
    }

    pub fn head_seq(&self, owner_id: &str) -> u64 {
        self.store.head_seq(owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationId as OpId, UpdateOp};
    use crate::schema::{CollectionSchema, FieldDef, ValueType};
    use crate::{CreateOp, Hlc, Operation, Schema, VersionVector};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(1).with_collection(CollectionSchema::new(
            "widgets",
            vec![
                FieldDef::optional("name", ValueType::String),
                FieldDef::optional("age", ValueType::Int),
            ],
        ))
    }

    #[test]
    fn s1_fast_path_concurrent_non_conflicting_fields() {
        let mut orchestrator = SyncOrchestrator::new(schema());

        orchestrator
            .push(&[Operation::Create(CreateOp::new(
                OpId::new("d1", 1),
                "owner-1",
                "r1",
                "widgets",
                json!({"name": "A", "age": 7}),
                Hlc::new("d1", 1000),
            ))])
            .into_iter()
            .for_each(|ack| assert!(matches!(ack.result, PushResult::Committed(1))));

        let base = VersionVector::single("d1", 1);

        let acks = orchestrator.push(&[Operation::Update(UpdateOp::new(
            OpId::new("d1", 2),
            "owner-1",
            "r1",
            "widgets",
            json!({"name": "B"}),
            base.clone(),
            Hlc::new("d1", 2000),
        ))]);
        assert_eq!(acks[0].result, PushResult::Committed(2));

        let acks = orchestrator.push(&[Operation::Update(UpdateOp::new(
            OpId::new("d2", 1),
            "owner-1",
            "r1",
            "widgets",
            json!({"age": 8}),
            base,
            Hlc::new("d2", 2100),
        ))]);
        assert_eq!(acks[0].result, PushResult::Committed(3));

        let record = orchestrator.store().get("owner-1", "r1").unwrap();
        assert_eq!(record.payload, json!({"name": "B", "age": 8}));
        assert_eq!(orchestrator.head_seq("owner-1"), 3);
    }

    #[test]
    fn push_broadcasts_to_owner_topic_subscribers() {
        let mut orchestrator = SyncOrchestrator::new(schema());
        let sub = orchestrator.bus_mut().subscribe("owner-1");

        orchestrator.push(&[Operation::Create(CreateOp::new(
            OpId::new("d1", 1),
            "owner-1",
            "r1",
            "widgets",
            json!({"name": "A"}),
            Hlc::new("d1", 1000),
        ))]);

        let delivered = orchestrator.bus_mut().drain("owner-1", sub);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].op_seq, 1);
    }

    #[test]
    fn s6_idempotent_replay_after_transport_flap() {
        let mut orchestrator = SyncOrchestrator::new(schema());
        let op = Operation::Create(CreateOp::new(
            OpId::new("d1", 1),
            "owner-1",
            "r1",
            "widgets",
            json!({"name": "A"}),
            Hlc::new("d1", 1000),
        ));

        let first = orchestrator.push(&[op.clone()]);
        assert_eq!(first[0].result, PushResult::Committed(1));

        // Same batch, re-sent after a dropped PUSH_RESULT.
        let replay = orchestrator.push(&[op]);
        assert_eq!(replay[0].result, PushResult::AlreadyCommitted(1));
        assert_eq!(orchestrator.head_seq("owner-1"), 1);
    }

    #[test]
    fn stale_base_is_rejected_without_commit_or_broadcast() {
        let mut orchestrator = SyncOrchestrator::new(schema());
        let sub = orchestrator.bus_mut().subscribe("owner-1");

        orchestrator.push(&[Operation::Create(CreateOp::new(
            OpId::new("d1", 1),
            "owner-1",
            "r1",
            "widgets",
            json!({"name": "A"}),
            Hlc::new("d1", 1000),
        ))]);
        orchestrator.bus_mut().drain("owner-1", sub);

        let stale = Operation::Update(UpdateOp::new(
            OpId::new("d2", 1),
            "owner-1",
            "r1",
            "widgets",
            json!({"name": "Z"}),
            VersionVector::single("d1", 99),
            Hlc::new("d2", 1500),
        ));
        let acks = orchestrator.push(&[stale]);
        assert!(matches!(acks[0].result, PushResult::Rejected(Error::StaleBase { .. })));
        assert_eq!(orchestrator.head_seq("owner-1"), 1);
        assert!(orchestrator.bus_mut().drain("owner-1", sub).is_empty());
    }

    #[test]
    fn pull_reads_tail_through_store() {
        let mut orchestrator = SyncOrchestrator::new(schema());
        orchestrator.push(&[Operation::Create(CreateOp::new(
            OpId::new("d1", 1),
            "owner-1",
            "r1",
            "widgets",
            json!({"name": "A"}),
            Hlc::new("d1", 1000),
        ))]);
        orchestrator.push(&[Operation::Create(CreateOp::new(
            OpId::new("d1", 2),
            "owner-1",
            "r2",
            "widgets",
            json!({"name": "B"}),
            Hlc::new("d1", 1100),
        ))]);

        let tail = orchestrator.pull("owner-1", 0, 10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].op_seq, 1);
        assert_eq!(tail[1].op_seq, 2);
    }
}
