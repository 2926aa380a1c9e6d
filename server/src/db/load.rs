//! Rebuilds the in-memory [`vectorsync_engine::VersionStore`] from durable
//! storage at startup.

use sqlx::PgPool;
use vectorsync_engine::{OwnerSnapshot, Schema, StoreSnapshot, VersionStore};

use crate::db::{op_log, records};

pub async fn load_store(pool: &PgPool, schema: Schema) -> Result<VersionStore, sqlx::Error> {
    let schema_version = schema.version;
    let mut store = VersionStore::new(schema);

    let owners = records::distinct_owners(pool).await?;
    if owners.is_empty() {
        return Ok(store);
    }

    let mut snapshot = StoreSnapshot::new(schema_version);
    for owner_id in owners {
        let owner_records = records::get_records_for_owner(pool, &owner_id).await?;
        let log = op_log::get_log_for_owner(pool, &owner_id).await?;

        let mut owner_snapshot = OwnerSnapshot::default();
        for record in owner_records {
            owner_snapshot.records.insert(record.record_id.clone(), record);
        }
        owner_snapshot.log = log;

        snapshot.owners.insert(owner_id, owner_snapshot);
    }

    store
        .import_snapshot(snapshot)
        .map_err(|e| sqlx::Error::Protocol(format!("durable state failed schema validation: {e}")))?;

    Ok(store)
}
