use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; vectors are little-endian f32 blobs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)")
        .execute(pool)
        .await?;

    Ok(())
}
