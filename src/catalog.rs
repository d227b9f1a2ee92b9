//! Local mirror of vendor sources, used only for the source listing merge.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Source, Visibility};

pub async fn upsert(
    pool: &SqlitePool,
    name: &str,
    visibility: Visibility,
    model: &str,
    description: Option<&str>,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO sources (name, visibility, model, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            visibility = excluded.visibility,
            model = excluded.model,
            description = excluded.description,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(visibility.as_str())
    .bind(model)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns `true` when a row was removed.
pub async fn remove(pool: &SqlitePool, name: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sources WHERE name = ?")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list(pool: &SqlitePool, visibility: Visibility) -> Result<Vec<Source>> {
    let rows = sqlx::query(
        r#"
        SELECT name, visibility, model, description, created_at, updated_at
        FROM sources
        WHERE visibility = ?
        ORDER BY name
        "#,
    )
    .bind(visibility.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(source_from_row).collect()
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let visibility: String = row.get("visibility");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    Ok(Source {
        name: row.get("name"),
        visibility: visibility.parse()?,
        model: row.get("model"),
        description: row.get("description"),
        created_at: Utc.timestamp_opt(created_at, 0).single().unwrap_or_default(),
        updated_at: Utc.timestamp_opt(updated_at, 0).single().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn upsert_keeps_names_unique() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();

        upsert(&pool, "oad-team", Visibility::Private, "ada-002", None)
            .await
            .unwrap();
        upsert(
            &pool,
            "oad-team",
            Visibility::Global,
            "ada-002",
            Some("team docs"),
        )
        .await
        .unwrap();

        assert!(list(&pool, Visibility::Private).await.unwrap().is_empty());
        let global = list(&pool, Visibility::Global).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].description.as_deref(), Some("team docs"));

        assert!(remove(&pool, "oad-team").await.unwrap());
        assert!(!remove(&pool, "oad-team").await.unwrap());
    }
}
