//! The three primitives spec §4.7 calls out as load-bearing: row-locked
//! dequeue, stale-reset, and soft-delete. Implemented generically over a
//! fixed set of internal relation names (never user input) so adding a new
//! queue-shaped table is a one-line addition, per spec §4.5's "O(1) to add a
//! table" requirement for the CDC registry.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use zeitwork_common::Result;

/// Claims the oldest `pending` row of `table` and flips it to `in_progress`,
/// returning its id. This is the *only* correct queue primitive (spec §9):
/// `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED) RETURNING id`.
/// Never substitute a `SELECT` followed by a separate `UPDATE`.
pub async fn dequeue_pending_id(
    pool: &PgPool,
    table: &str,
    in_progress_status: &str,
    started_at_column: Option<&str>,
) -> Result<Option<Uuid>> {
    let started_at_set = match started_at_column {
        Some(col) => format!(", {col} = now()"),
        None => String::new(),
    };

    let sql = format!(
        "UPDATE {table}
            SET status = $1{started_at_set}, updated_at = now()
          WHERE id = (
              SELECT id FROM {table}
               WHERE status = 'pending' AND deleted_at IS NULL
               ORDER BY created_at
               LIMIT 1
                 FOR UPDATE SKIP LOCKED
          )
        RETURNING id"
    );

    let row: Option<(Uuid,)> = sqlx::query_as(&sql)
        .bind(in_progress_status)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(id,)| id))
}

/// Flips rows of `table` stuck in `stuck_status` for longer than `timeout`
/// back to `pending`, so another worker can claim them (spec §4.2 step 7).
pub async fn reset_stale(
    pool: &PgPool,
    table: &str,
    stuck_status: &str,
    since_column: &str,
    older_than: DateTime<Utc>,
) -> Result<u64> {
    let sql = format!(
        "UPDATE {table}
            SET status = 'pending', updated_at = now()
          WHERE status = $1 AND deleted_at IS NULL AND {since_column} < $2"
    );

    let result = sqlx::query(&sql)
        .bind(stuck_status)
        .bind(older_than)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Soft-deletes a row: sets `deleted_at`/`updated_at`, never a physical
/// `DELETE` (spec §9 — "soft-delete, not hard-delete, for VMs and builds").
pub async fn soft_delete(pool: &PgPool, table: &str, id: Uuid) -> Result<()> {
    let sql = format!("UPDATE {table} SET deleted_at = now(), updated_at = now() WHERE id = $1");
    sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(())
}
