use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// String key/value storage behind session progress and nudge state.
///
/// Two instances are wired into a session: a durable one that survives
/// restarts (act progression, landing flag) and an ephemeral per-tab one
/// (counters, nudge stage). Implementations are allowed to fail; the
/// `*_best_effort` helpers below turn every failure into a default.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-memory store. Lives exactly as long as the process, which is what the
/// per-tab scope asks for.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        entries.clear();
        Ok(())
    }
}

/// SQLite-backed durable store with a single `session_kv` table.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open session store at {:?}", path))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS session_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )
        .context("Failed to create session_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("session store connection lock poisoned"))
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT value FROM session_kv WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO session_kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM session_kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM session_kv", [])?;
        Ok(())
    }
}

pub fn read_best_effort(store: &dyn SessionStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Session store read of '{}' failed, using default: {}", key, e);
            None
        }
    }
}

pub fn write_best_effort(store: &dyn SessionStore, key: &str, value: &str) {
    if let Err(e) = store.set(key, value) {
        tracing::debug!("Session store write of '{}' skipped: {}", key, e);
    }
}

pub fn remove_best_effort(store: &dyn SessionStore, key: &str) {
    if let Err(e) = store.remove(key) {
        tracing::debug!("Session store removal of '{}' skipped: {}", key, e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Store that refuses every operation, standing in for disabled storage.
    pub(crate) struct UnavailableStore;

    impl SessionStore for UnavailableStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("storage disabled")
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("quota exceeded")
        }

        fn remove(&self, _key: &str) -> Result<()> {
            anyhow::bail!("storage disabled")
        }

        fn clear(&self) -> Result<()> {
            anyhow::bail!("storage disabled")
        }
    }

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemorySessionStore::new();
        assert!(store.get("mimsy.act").unwrap().is_none());

        store.set("mimsy.act", "1").unwrap();
        assert_eq!(store.get("mimsy.act").unwrap().as_deref(), Some("1"));

        store.remove("mimsy.act").unwrap();
        assert!(store.get("mimsy.act").unwrap().is_none());
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.db");

        {
            let store = SqliteSessionStore::new(&path).expect("open store");
            store.set("mimsy.act", "2").unwrap();
            store.set("mimsy.landing_complete", "1").unwrap();
            store.set("mimsy.act", "all").unwrap();
        }

        let reopened = SqliteSessionStore::new(&path).expect("reopen store");
        assert_eq!(reopened.get("mimsy.act").unwrap().as_deref(), Some("all"));

        reopened.clear().unwrap();
        assert!(reopened.get("mimsy.landing_complete").unwrap().is_none());
    }

    #[test]
    fn best_effort_helpers_swallow_failures() {
        let store = UnavailableStore;
        assert!(read_best_effort(&store, "mimsy.act").is_none());
        write_best_effort(&store, "mimsy.act", "1");
        remove_best_effort(&store, "mimsy.act");
    }
}
