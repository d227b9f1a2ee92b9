//! Upload ledger.
//!
//! Every processing attempt for a dropped or manually uploaded file gets its
//! own row. Rows are never deleted; the status of a row is updated in place as
//! the upload advances.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{UploadRecord, UploadStatus};

/// Fields of a ledger row at creation time.
#[derive(Debug, Clone)]
pub struct NewRecord<'a> {
    pub file_name: &'a str,
    pub source: &'a str,
    pub status: UploadStatus,
    pub task_id: Option<&'a str>,
    pub preview_url: Option<&'a str>,
}

impl<'a> NewRecord<'a> {
    pub fn new(file_name: &'a str, source: &'a str, status: UploadStatus) -> Self {
        Self {
            file_name,
            source,
            status,
            task_id: None,
            preview_url: None,
        }
    }
}

pub async fn insert(pool: &SqlitePool, record: &NewRecord<'_>) -> Result<i64> {
    let now = Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO upload_records (file_name, source, status, task_id, preview_url, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.file_name)
    .bind(record.source)
    .bind(record.status.as_str())
    .bind(record.task_id)
    .bind(record.preview_url)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn set_status(pool: &SqlitePool, id: i64, status: UploadStatus) -> Result<()> {
    sqlx::query("UPDATE upload_records SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update every row tracking a vendor task. Returns the number of rows changed.
pub async fn set_status_by_task(
    pool: &SqlitePool,
    task_id: &str,
    status: UploadStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE upload_records SET status = ? WHERE task_id = ?")
        .bind(status.as_str())
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Every distinct `(file_name, source)` pair ever recorded.
pub async fn uploaded_files(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query("SELECT DISTINCT file_name, source FROM upload_records")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("file_name"), row.get("source")))
        .collect())
}

/// Most recent rows first, ties broken by insertion order.
pub async fn latest(pool: &SqlitePool, limit: i64) -> Result<Vec<UploadRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, file_name, source, status, task_id, preview_url, timestamp
        FROM upload_records
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(record_from_row).collect())
}

/// The newest row for each distinct file name.
pub async fn latest_per_file(pool: &SqlitePool, limit: i64) -> Result<Vec<UploadRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.file_name, r.source, r.status, r.task_id, r.preview_url, r.timestamp
        FROM upload_records r
        WHERE r.id = (
            SELECT r2.id FROM upload_records r2
            WHERE r2.file_name = r.file_name
            ORDER BY r2.timestamp DESC, r2.id DESC
            LIMIT 1
        )
        ORDER BY r.timestamp DESC, r.id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(record_from_row).collect())
}

/// Every attempt recorded for one file, newest first.
pub async fn history(pool: &SqlitePool, file_name: &str) -> Result<Vec<UploadRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, file_name, source, status, task_id, preview_url, timestamp
        FROM upload_records
        WHERE file_name = ?
        ORDER BY timestamp DESC, id DESC
        "#,
    )
    .bind(file_name)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(record_from_row).collect())
}

fn record_from_row(row: &SqliteRow) -> UploadRecord {
    let status: String = row.get("status");
    let timestamp: i64 = row.get("timestamp");
    UploadRecord {
        id: row.get("id"),
        file_name: row.get("file_name"),
        source: row.get("source"),
        status: UploadStatus::parse(&status),
        task_id: row.get("task_id"),
        preview_url: row.get("preview_url"),
        timestamp: Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_default(),
    }
}
