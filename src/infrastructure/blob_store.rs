use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Load/save-by-name persistence for JSON records.
pub trait NamedBlobStore: Send + Sync {
    fn load_named(&self, name: &str) -> Result<Option<serde_json::Value>, InfraError>;
    fn save_named(&self, name: &str, blob: &serde_json::Value) -> Result<(), InfraError>;
    fn remove_named(&self, name: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteNamedBlobStore {
    db_path: PathBuf,
}

impl SqliteNamedBlobStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl NamedBlobStore for SqliteNamedBlobStore {
    fn load_named(&self, name: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let connection = self.connect()?;
        let payload: Option<String> = connection
            .query_row(
                "SELECT payload FROM named_blobs WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn save_named(&self, name: &str, blob: &serde_json::Value) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO named_blobs (name, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![name, serde_json::to_string(blob)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove_named(&self, name: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM named_blobs WHERE name = ?1", params![name])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNamedBlobStore {
    blobs: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryNamedBlobStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>>, InfraError> {
        self.blobs
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("blob store lock poisoned: {error}")))
    }
}

impl NamedBlobStore for InMemoryNamedBlobStore {
    fn load_named(&self, name: &str) -> Result<Option<serde_json::Value>, InfraError> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn save_named(&self, name: &str, blob: &serde_json::Value) -> Result<(), InfraError> {
        self.lock()?.insert(name.to_string(), blob.clone());
        Ok(())
    }

    fn remove_named(&self, name: &str) -> Result<(), InfraError> {
        self.lock()?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "riff-groups-blob-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("state.sqlite");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn sqlite_store_saves_overwrites_and_removes() {
        let database = TempDatabase::new();
        let store = SqliteNamedBlobStore::new(&database.path);

        assert_eq!(store.load_named("cache-data.json").expect("load"), None);

        store
            .save_named("cache-data.json", &serde_json::json!({"g1": {"blockIds": ["a"]}}))
            .expect("save");
        store
            .save_named("cache-data.json", &serde_json::json!({"g2": {"blockIds": []}}))
            .expect("overwrite");

        let loaded = store.load_named("cache-data.json").expect("load").expect("present");
        assert!(loaded.get("g1").is_none());
        assert!(loaded.get("g2").is_some());

        store.remove_named("cache-data.json").expect("remove");
        assert_eq!(store.load_named("cache-data.json").expect("load"), None);
    }

    #[test]
    fn initialize_database_is_idempotent() {
        let database = TempDatabase::new();
        initialize_database(&database.path).expect("second initialization");
    }

    #[test]
    fn in_memory_store_isolated_by_name() {
        let store = InMemoryNamedBlobStore::default();
        store.save_named("a", &serde_json::json!(1)).expect("save a");
        store.save_named("b", &serde_json::json!(2)).expect("save b");
        store.remove_named("a").expect("remove a");

        assert_eq!(store.load_named("a").expect("load a"), None);
        assert_eq!(store.load_named("b").expect("load b"), Some(serde_json::json!(2)));
    }
}
