//! Database operations for the `records` table.
//!
//! Each row stores a whole serialized [`Record`] under `data`; `owner_id`,
//! `record_id`, `collection`, `op_seq`, and `tombstone` are projected out as
//! real columns so they can be indexed and filtered without touching JSON.

use sqlx::{types::Json, PgPool, Row};
use vectorsync_engine::{OwnerId, Record};

#[derive(Debug)]
pub struct StoredRecord {
    pub data: Json<Record>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            data: row.try_get("data")?,
        })
    }
}

/// Insert or update a record's durable copy.
pub async fn upsert_record(pool: &PgPool, record: &Record) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO records (owner_id, record_id, collection, op_seq, tombstone, data)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (owner_id, record_id) DO UPDATE SET
            collection = EXCLUDED.collection,
            op_seq = EXCLUDED.op_seq,
            tombstone = EXCLUDED.tombstone,
            data = EXCLUDED.data,
            updated_at = now()
        "#,
    )
    .bind(&record.owner_id)
    .bind(&record.record_id)
    .bind(&record.collection)
    .bind(record.op_seq as i64)
    .bind(record.tombstone)
    .bind(Json(record))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_record(pool: &PgPool, owner_id: &str, record_id: &str) -> Result<Option<Record>, sqlx::Error> {
    let row: Option<StoredRecord> = sqlx::query_as(
        r#"SELECT data FROM records WHERE owner_id = $1 AND record_id = $2"#,
    )
    .bind(owner_id)
    .bind(record_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.data.0))
}

/// All records for an owner, used to rebuild the in-memory store at startup.
pub async fn get_records_for_owner(pool: &PgPool, owner_id: &str) -> Result<Vec<Record>, sqlx::Error> {
    let rows: Vec<StoredRecord> = sqlx::query_as(r#"SELECT data FROM records WHERE owner_id = $1"#)
        .bind(owner_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.data.0).collect())
}

/// Every owner with at least one durable record, used to drive startup load.
pub async fn distinct_owners(pool: &PgPool) -> Result<Vec<OwnerId>, sqlx::Error> {
    let rows = sqlx::query(r#"SELECT DISTINCT owner_id FROM records"#)
        .fetch_all(pool)
        .await?;

    rows.iter().map(|row| row.try_get("owner_id")).collect()
}

/// Tombstoned records whose grace window has elapsed, eligible for permanent removal.
pub async fn expired_tombstones(pool: &PgPool, grace_days: u32) -> Result<Vec<(OwnerId, String)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT owner_id, record_id FROM records
        WHERE tombstone = true AND updated_at < now() - make_interval(days => $1)
        "#,
    )
    .bind(grace_days as i32)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| Ok((row.try_get("owner_id")?, row.try_get("record_id")?)))
        .collect()
}

pub async fn delete_record(pool: &PgPool, owner_id: &str, record_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM records WHERE owner_id = $1 AND record_id = $2"#)
        .bind(owner_id)
        .bind(record_id)
        .execute(pool)
        .await?;

    Ok(())
}
