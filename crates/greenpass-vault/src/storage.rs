use greenpass_core::{GreenpassError, GreenpassResult, RecordId, StorageBackend};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite key-value backend.
///
/// Compare-and-swap is a single conditional statement, so it stays atomic
/// even when several processes share the database file.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> GreenpassError {
    move |e| GreenpassError::Storage(format!("{}: {}", context, e))
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> GreenpassResult<Self> {
        let conn = Connection::open(path).map_err(storage_err("failed to open database"))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> GreenpassResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err("failed to open database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> GreenpassResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                record_id TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at TEXT DEFAULT (datetime('now'))
            );",
        )
        .map_err(storage_err("failed to create tables"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> GreenpassResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GreenpassError::Storage(format!("lock poisoned: {}", e)))
    }
}

impl StorageBackend for SqliteBackend {
    fn get(&self, record_id: &RecordId) -> GreenpassResult<Option<Vec<u8>>> {
        self.conn()?
            .query_row(
                "SELECT value FROM records WHERE record_id = ?1",
                params![record_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("query failed"))
    }

    fn put(&self, record_id: &RecordId, data: &[u8]) -> GreenpassResult<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO records (record_id, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))",
                params![record_id.as_str(), data],
            )
            .map_err(storage_err("insert failed"))?;
        Ok(())
    }

    fn delete(&self, record_id: &RecordId) -> GreenpassResult<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM records WHERE record_id = ?1",
                params![record_id.as_str()],
            )
            .map_err(storage_err("delete failed"))?;
        Ok(rows > 0)
    }

    fn compare_and_swap(
        &self,
        record_id: &RecordId,
        expected: Option<&[u8]>,
        new_value: &[u8],
    ) -> GreenpassResult<bool> {
        let conn = self.conn()?;
        let rows = match expected {
            None => conn.execute(
                "INSERT OR IGNORE INTO records (record_id, value) VALUES (?1, ?2)",
                params![record_id.as_str(), new_value],
            ),
            Some(expected) => conn.execute(
                "UPDATE records SET value = ?2, updated_at = datetime('now')
                 WHERE record_id = ?1 AND value = ?3",
                params![record_id.as_str(), new_value, expected],
            ),
        }
        .map_err(storage_err("CAS failed"))?;
        Ok(rows == 1)
    }

    fn exists(&self, record_id: &RecordId) -> GreenpassResult<bool> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM records WHERE record_id = ?1",
                params![record_id.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err("exists query failed"))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> SqliteBackend {
        SqliteBackend::in_memory().unwrap()
    }

    #[test]
    fn test_get_nonexistent() {
        let backend = test_backend();
        assert!(backend.get(&RecordId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_put_overwrite_and_delete() {
        let backend = test_backend();
        let id = RecordId::new("holder-secret-key");

        backend.put(&id, b"data-1").unwrap();
        backend.put(&id, b"data-2").unwrap();
        assert_eq!(backend.get(&id).unwrap().unwrap(), b"data-2");
        assert!(backend.exists(&id).unwrap());
        assert!(backend.delete(&id).unwrap());
        assert!(!backend.delete(&id).unwrap());
    }

    #[test]
    fn test_cas_insert_only_when_absent() {
        let backend = test_backend();
        let id = RecordId::new("holder-secret-key");
        assert!(backend.compare_and_swap(&id, None, b"v1").unwrap());
        assert!(!backend.compare_and_swap(&id, None, b"v2").unwrap());
        assert_eq!(backend.get(&id).unwrap().unwrap(), b"v1");
    }

    #[test]
    fn test_cas_update_requires_match() {
        let backend = test_backend();
        let id = RecordId::new("k");
        backend.put(&id, b"v1").unwrap();
        assert!(!backend.compare_and_swap(&id, Some(b"nope"), b"v2").unwrap());
        assert!(backend.compare_and_swap(&id, Some(b"v1"), b"v2").unwrap());
        assert_eq!(backend.get(&id).unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_secret_key_store_over_sqlite() {
        use crate::secret_key::SecretKeyStore;
        use std::sync::Arc;

        let backend: Arc<dyn StorageBackend> = Arc::new(test_backend());
        let a = SecretKeyStore::new(Arc::clone(&backend)).get_or_create().unwrap();
        let b = SecretKeyStore::new(backend).get_or_create().unwrap();
        assert_eq!(*a, *b);
    }
}
