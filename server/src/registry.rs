//! The shared, in-process engine runtime.
//!
//! A [`vectorsync_engine::VersionStore`] already partitions by `owner_id`
//! and a [`vectorsync_engine::Bus`] already partitions by topic, so a single
//! `SyncOrchestrator` (and a single `QueueStore`, partitioned by device)
//! serves every owner this process handles — there is no per-owner actor to
//! spin up. What this type adds on top is the async-safe wrapping the engine
//! itself deliberately leaves to its embedder.

use std::sync::Mutex;

use vectorsync_engine::{Operation, PushAck, QueueEntry, QueueStore, Record, Schema, SyncOrchestrator, VersionStore};

/// Shared handle to the version store, broadcast bus, and offline queue.
pub struct EngineRuntime {
    orchestrator: Mutex<SyncOrchestrator>,
    queue: Mutex<QueueStore>,
}

impl EngineRuntime {
    pub fn new(schema: Schema) -> Self {
        Self {
            orchestrator: Mutex::new(SyncOrchestrator::new(schema)),
            queue: Mutex::new(QueueStore::new()),
        }
    }

    /// Build around a store already restored from durable storage.
    pub fn from_store(store: VersionStore) -> Self {
        Self {
            orchestrator: Mutex::new(SyncOrchestrator::from_store(store)),
            queue: Mutex::new(QueueStore::new()),
        }
    }

    /// Runs `push` under the orchestrator lock. The lock never spans an
    /// `.await`: callers persist the resulting acks afterward.
    pub fn push(&self, ops: &[Operation]) -> Vec<PushAck> {
        self.orchestrator.lock().unwrap().push(ops)
    }

    pub fn pull(&self, owner_id: &str, since_seq: u64, limit: usize) -> Vec<vectorsync_engine::LoggedOp> {
        self.orchestrator.lock().unwrap().pull(owner_id, since_seq, limit)
    }

    pub fn head_seq(&self, owner_id: &str) -> u64 {
        self.orchestrator.lock().unwrap().head_seq(owner_id)
    }

    /// The current merged state of one record, if it exists and isn't
    /// tombstoned past the point `get` cares about.
    pub fn get_record(&self, owner_id: &str, record_id: &str) -> Option<Record> {
        self.orchestrator.lock().unwrap().store().get(owner_id, record_id).cloned()
    }

    pub fn subscribe(&self, owner_id: &str) -> vectorsync_engine::Subscription {
        self.orchestrator.lock().unwrap().bus_mut().subscribe(owner_id)
    }

    pub fn unsubscribe(&self, owner_id: &str, subscription: vectorsync_engine::Subscription) {
        self.orchestrator.lock().unwrap().bus_mut().unsubscribe(owner_id, subscription);
    }

    pub fn drain_bus(&self, owner_id: &str, subscription: vectorsync_engine::Subscription) -> Vec<vectorsync_engine::LoggedOp> {
        self.orchestrator.lock().unwrap().bus_mut().drain(owner_id, subscription)
    }

    /// Reclaim an owner's bus topic once it has had no active or
    /// reconnect-eligible sessions for `owner_idle_teardown_secs`.
    pub fn drop_owner_topic(&self, owner_id: &str) {
        self.orchestrator.lock().unwrap().bus_mut().drop_topic(owner_id);
    }

    pub fn export_snapshot(&self) -> vectorsync_engine::StoreSnapshot {
        self.orchestrator.lock().unwrap().store().export_snapshot()
    }

    pub fn enqueue(&self, device_id: &str, op: Operation, now: u64) {
        self.queue.lock().unwrap().enqueue(device_id.to_string(), op, now);
    }

    pub fn drain_queue(&self, device_id: &str) -> Vec<QueueEntry> {
        self.queue.lock().unwrap().drain(device_id)
    }

    pub fn queue_len(&self, device_id: &str) -> usize {
        self.queue.lock().unwrap().len(device_id)
    }
}
