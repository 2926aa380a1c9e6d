//! Database operations for the `op_log` table: the durable, append-only
//! record of every operation an owner partition has committed.

use sqlx::{types::Json, PgPool, Row};
use vectorsync_engine::LoggedOp;

#[derive(Debug)]
struct StoredLoggedOp {
    data: Json<LoggedOp>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredLoggedOp {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredLoggedOp {
            data: row.try_get("data")?,
        })
    }
}

/// Append one committed operation. `op_seq` is already final by the time
/// this is called (assigned by the in-memory store), so this is a plain
/// insert, never an update.
pub async fn insert_logged_op(pool: &PgPool, owner_id: &str, logged: &LoggedOp) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO op_log (owner_id, op_seq, op_id, data)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (owner_id, op_seq) DO NOTHING
        "#,
    )
    .bind(owner_id)
    .bind(logged.op_seq as i64)
    .bind(logged.op.op_id().to_string())
    .bind(Json(logged))
    .execute(pool)
    .await?;

    Ok(())
}

/// The full log for an owner, in `op_seq` order, used to rebuild the
/// in-memory store at startup.
pub async fn get_log_for_owner(pool: &PgPool, owner_id: &str) -> Result<Vec<LoggedOp>, sqlx::Error> {
    let rows: Vec<StoredLoggedOp> = sqlx::query_as(
        r#"SELECT data FROM op_log WHERE owner_id = $1 ORDER BY op_seq ASC"#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.data.0).collect())
}
