use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous}, Row};

/// Key/value persistence for serialized store state.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn save(&self, key: &str, blob: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqliteBlobStore {
    pool: Pool<Sqlite>,
}

impl SqliteBlobStore {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, "blob store ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("copilot");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("copilot.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM blobs WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn save(&self, key: &str, blob: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local store, used for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, String>>,
    fail_saves: AtomicBool,
}

impl MemoryBlobStore {
    pub fn with_blob(key: &str, blob: impl Into<String>) -> Self {
        let store = Self::default();
        store.lock().insert(key.to_string(), blob.into());
        store
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // a poisoned map still holds the last complete write
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, blob: &str) -> anyhow::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("memory blob store is read-only");
        }
        self.lock().insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_temp() -> (SqliteBlobStore, tempfile::TempDir, String) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        let store = SqliteBlobStore::initialize(Some(url.clone())).await.unwrap();
        (store, dir, url)
    }

    #[tokio::test]
    async fn save_load_overwrite_roundtrip() {
        let (store, _dir, _url) = open_temp().await;
        assert_eq!(store.load("state").await.unwrap(), None);

        store.save("state", r#"{"v":1}"#).await.unwrap();
        assert_eq!(store.load("state").await.unwrap().as_deref(), Some(r#"{"v":1}"#));

        store.save("state", r#"{"v":2}"#).await.unwrap();
        assert_eq!(store.load("state").await.unwrap().as_deref(), Some(r#"{"v":2}"#));
        assert_eq!(store.load("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pragmas_and_migrations_applied() {
        let (store, _dir, url) = open_temp().await;

        let row = sqlx::query("PRAGMA journal_mode;").fetch_one(store.pool()).await.unwrap();
        let mode: String = row.get(0);
        assert!(mode.eq_ignore_ascii_case("wal"), "journal_mode should be WAL, got {}", mode);

        let row = sqlx::query("PRAGMA busy_timeout;").fetch_one(store.pool()).await.unwrap();
        let timeout: i64 = row.get(0);
        assert!(timeout >= 5000, "busy_timeout should be at least 5000, got {}", timeout);

        // Migrations idempotent: re-run initialize on same file
        store.save("k", "v").await.unwrap();
        let reopened = SqliteBlobStore::initialize(Some(url)).await.unwrap();
        assert_eq!(reopened.load("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn memory_store_can_refuse_writes() {
        let store = MemoryBlobStore::with_blob("k", "old");
        store.fail_saves(true);
        assert!(store.save("k", "new").await.is_err());
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("old"));
        store.fail_saves(false);
        store.save("k", "new").await.unwrap();
        assert_eq!(store.get("k").as_deref(), Some("new"));
    }
}
