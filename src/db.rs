use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the index database inside the persist directory.
pub const INDEX_FILE: &str = "index.sqlite3";

pub fn index_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(INDEX_FILE)
}

/// Open (creating if missing) the index database under `persist_dir`.
pub async fn connect(persist_dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(persist_dir).with_context(|| {
        format!(
            "Failed to create persist directory: {}",
            persist_dir.display()
        )
    })?;

    let db_path = index_path(persist_dir);
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index database: {}", db_path.display()))?;

    Ok(pool)
}

/// Delete the index database and its WAL side files. Missing files are not
/// an error.
pub fn remove_index_files(persist_dir: &Path) -> Result<()> {
    let db_path = index_path(persist_dir);
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{}", db_path.display(), suffix));
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }
    Ok(())
}
