//! Database operations for the `sessions` table: a durable record of each
//! device's live connection state, mainly useful for operator visibility
//! and for recognizing a reconnect within the reconnect window.

use sqlx::{types::Json, PgPool, Row};
use vectorsync_engine::Session;

#[derive(Debug)]
struct StoredSession {
    data: Json<Session>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredSession {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredSession {
            data: row.try_get("data")?,
        })
    }
}

pub async fn upsert_session(pool: &PgPool, session: &Session) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, owner_id, device_id, data)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (session_id) DO UPDATE SET
            data = EXCLUDED.data,
            updated_at = now()
        "#,
    )
    .bind(&session.session_id)
    .bind(&session.owner_id)
    .bind(&session.device_id)
    .bind(Json(session))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_session(pool: &PgPool, session_id: &str) -> Result<Option<Session>, sqlx::Error> {
    let row: Option<StoredSession> = sqlx::query_as(
        r#"SELECT data FROM sessions WHERE session_id = $1"#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.data.0))
}

pub async fn delete_session(pool: &PgPool, session_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM sessions WHERE session_id = $1"#)
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}
