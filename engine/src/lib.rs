//! # VectorSync Engine
//!
//! A deterministic sync engine for cross-device, local-first applications.
//!
//! This crate provides the core logic for server-side synchronization:
//! causal ordering, field-level conflict resolution, an owner-partitioned
//! version store, an offline-device queue, session state, and a pub/sub bus
//! with reorder recovery. It has no knowledge of sockets, databases, or async
//! runtimes — those concerns live in the server crate that embeds it.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform.
//! - **Deterministic**: the same `(state, operation)` pair always reconciles
//!   to the same output, so every replica converges.
//! - **Testable**: pure logic, no mocks needed.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is identified by `(owner_id, record_id)`. It carries a JSON
//! payload, a [`VersionVector`] capturing what every writing device has
//! contributed, and per-field bookkeeping the merge engine needs to
//! reconcile concurrent edits.
//!
//! ### Operations
//!
//! Changes are expressed as operations, never direct mutations:
//! - [`CreateOp`] — the first write to a record.
//! - [`UpdateOp`] — a patch applied against a known base version vector.
//! - [`DeleteOp`] — tombstones a record.
//!
//! ### Hybrid Logical Clock
//!
//! [`Hlc`] gives causal, total ordering across devices with skewed wall
//! clocks: physical time first, a logical counter to break same-millisecond
//! ties, then device id as the final tiebreaker.
//!
//! ### Merge Engine
//!
//! [`merge::reconcile`] classifies an incoming op's base vector against a
//! record's current version vector ([`BaseRelation`]) and applies a
//! deterministic, per-field policy ([`MergeKind`]) — scalar last-writer-wins,
//! set-union with tombstones, commutative counters, or a conflict resolved by
//! the collection's [`ResolverStrategy`].
//!
//! ## Quick Start
//!
//! ```rust
//! use vectorsync_engine::{
//!     CollectionSchema, FieldDef, Schema, ValueType,
//!     VersionStore, Operation, CreateOp, OperationId, Hlc,
//! };
//! use serde_json::json;
//!
//! let schema = Schema::new(1).with_collection(CollectionSchema::new(
//!     "notes",
//!     vec![FieldDef::required("body", ValueType::String)],
//! ));
//!
//! let mut store = VersionStore::new(schema);
//!
//! let op = Operation::Create(CreateOp::new(
//!     OperationId::new("device-1", 1),
//!     "owner-1",
//!     "note-1",
//!     "notes",
//!     json!({"body": "hello"}),
//!     Hlc::new("device-1", 1_700_000_000_000),
//! ));
//!
//! store.commit(&op).unwrap();
//! assert_eq!(store.get("owner-1", "note-1").unwrap().payload["body"], json!("hello"));
//! ```
//!
//! ## Persistence
//!
//! Use [`snapshot::StoreSnapshot`] to export and restore durable state.
//! Snapshots serialize to JSON with deterministic key ordering via
//! `BTreeMap`, independent of insertion order.

pub mod bus;
pub mod clock;
pub mod error;
pub mod merge;
pub mod operation;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod vector;

// Re-export main types at crate root.
pub use bus::{Bus, ReorderBuffer, ReorderOutcome, Subscription};
pub use clock::Hlc;
pub use error::Error;
pub use merge::{AppliedMerge, BaseRelation, MergeOutcome, RejectReason};
pub use operation::{CreateOp, DeleteOp, Operation, OperationId, UpdateOp};
pub use orchestrator::{PushAck, PushResult, SyncOrchestrator};
pub use queue::{QueueEntry, QueueStore};
pub use record::Record;
pub use schema::{CollectionSchema, FieldDef, MergeKind, ResolverStrategy, Schema, ValueType};
pub use session::{Session, SessionState};
pub use snapshot::{OwnerSnapshot, SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{CommitOutcome, LoggedOp, VersionStore};
pub use vector::{VectorOrdering, VersionVector};

/// Identifier types for clarity at call sites; all are plain strings on the wire.
pub type RecordId = String;
pub type CollectionName = String;
pub type DeviceId = String;
pub type OwnerId = String;
pub type SchemaVersion = u32;
