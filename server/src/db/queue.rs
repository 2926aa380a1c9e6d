//! Database operations for the `queue` table: durable copies of each
//! device's pending offline operations, so a crash doesn't lose queued work
//! that hasn't been delivered yet.

use sqlx::{types::Json, PgPool, Row};
use vectorsync_engine::QueueEntry;

#[derive(Debug)]
struct StoredQueueEntry {
    data: Json<QueueEntry>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredQueueEntry {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredQueueEntry {
            data: row.try_get("data")?,
        })
    }
}

pub async fn upsert_queue_entry(pool: &PgPool, device_id: &str, entry: &QueueEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO queue (device_id, record_id, data)
        VALUES ($1, $2, $3)
        ON CONFLICT (device_id, record_id) DO UPDATE SET data = EXCLUDED.data
        "#,
    )
    .bind(device_id)
    .bind(entry.op.record_id())
    .bind(Json(entry))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_queue_for_device(pool: &PgPool, device_id: &str) -> Result<Vec<QueueEntry>, sqlx::Error> {
    let rows: Vec<StoredQueueEntry> = sqlx::query_as(
        r#"SELECT data FROM queue WHERE device_id = $1"#,
    )
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.data.0).collect())
}

pub async fn clear_queue(pool: &PgPool, device_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM queue WHERE device_id = $1"#)
        .bind(device_id)
        .execute(pool)
        .await?;

    Ok(())
}
