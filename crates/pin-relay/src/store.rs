//! SQLite-backed session storage
//!
//! One row per PIN, tracking the pairing lifecycle: creation, fixed expiry,
//! live-connection flags, and the PC-announced base directory. The connection
//! flags mirror live socket state for observability; the in-memory
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry) stays the
//! source of truth for which legs are actually attached.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Pairing codes live for a fixed 15 days from registration. The TTL is not
/// renewed by activity; expiry is enforced lazily at user admission time.
pub const SESSION_TTL_SECS: i64 = 15 * 24 * 60 * 60;

/// Current time as unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("PIN already registered")]
    AlreadyExists,
    #[error("PIN not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable record of one pairing session.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingSession {
    pub pin: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_activity_at: i64,
    pub pc_connected: bool,
    pub user_connected: bool,
    pub base_directory: Option<String>,
}

impl PairingSession {
    fn new(pin: &str, now: i64) -> Self {
        Self {
            pin: pin.to_owned(),
            created_at: now,
            expires_at: now + SESSION_TTL_SECS,
            last_activity_at: now,
            pc_connected: false,
            user_connected: false,
            base_directory: None,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Session store contract
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new PIN. Fails with [`StoreError::AlreadyExists`] when the
    /// PIN is taken; existence is checked explicitly so callers see a stable
    /// error kind rather than a backend constraint violation.
    async fn create(&self, pin: &str) -> Result<PairingSession, StoreError>;
    async fn get(&self, pin: &str) -> Result<PairingSession, StoreError>;
    /// Also refreshes `last_activity_at`.
    async fn set_pc_connected(&self, pin: &str, connected: bool) -> Result<(), StoreError>;
    async fn set_user_connected(&self, pin: &str, connected: bool) -> Result<(), StoreError>;
    async fn set_base_directory(&self, pin: &str, path: &str) -> Result<(), StoreError>;
}

/// SQLite-based session store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        run_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    pin TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    last_activity_at INTEGER NOT NULL,
                    pc_connected INTEGER NOT NULL DEFAULT 0,
                    user_connected INTEGER NOT NULL DEFAULT 0,
                    base_directory TEXT
                )
                "#,
                [],
            )?;
            Ok(())
        })
        .await
    }
}

/// Run a blocking storage closure on the blocking thread pool.
async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<PairingSession> {
    Ok(PairingSession {
        pin: row.get(0)?,
        created_at: row.get(1)?,
        expires_at: row.get(2)?,
        last_activity_at: row.get(3)?,
        pc_connected: row.get(4)?,
        user_connected: row.get(5)?,
        base_directory: row.get(6)?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(&self, pin: &str) -> Result<PairingSession, StoreError> {
        let conn = self.conn.clone();
        let pin = pin.to_owned();
        run_blocking(move || {
            let conn = conn.lock().unwrap();

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM sessions WHERE pin = ?1",
                    params![pin],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::AlreadyExists);
            }

            let session = PairingSession::new(&pin, unix_now());
            conn.execute(
                r#"
                INSERT INTO sessions
                (pin, created_at, expires_at, last_activity_at, pc_connected, user_connected, base_directory)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    session.pin,
                    session.created_at,
                    session.expires_at,
                    session.last_activity_at,
                    session.pc_connected,
                    session.user_connected,
                    session.base_directory,
                ],
            )?;

            Ok(session)
        })
        .await
    }

    async fn get(&self, pin: &str) -> Result<PairingSession, StoreError> {
        let conn = self.conn.clone();
        let pin = pin.to_owned();
        run_blocking(move || {
            let conn = conn.lock().unwrap();
            let session = conn
                .query_row(
                    r#"
                    SELECT pin, created_at, expires_at, last_activity_at,
                           pc_connected, user_connected, base_directory
                    FROM sessions WHERE pin = ?1
                    "#,
                    params![pin],
                    row_to_session,
                )
                .optional()?;
            session.ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn set_pc_connected(&self, pin: &str, connected: bool) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let pin = pin.to_owned();
        run_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn.execute(
                "UPDATE sessions SET pc_connected = ?1, last_activity_at = ?2 WHERE pin = ?3",
                params![connected, unix_now(), pin],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn set_user_connected(&self, pin: &str, connected: bool) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let pin = pin.to_owned();
        run_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn.execute(
                "UPDATE sessions SET user_connected = ?1 WHERE pin = ?2",
                params![connected, pin],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn set_base_directory(&self, pin: &str, path: &str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let pin = pin.to_owned();
        let path = path.to_owned();
        run_blocking(move || {
            let conn = conn.lock().unwrap();
            let changed = conn.execute(
                "UPDATE sessions SET base_directory = ?1 WHERE pin = ?2",
                params![path, pin],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}

/// In-memory store for testing
#[cfg(test)]
pub struct MemoryStore {
    sessions: Mutex<std::collections::HashMap<String, PairingSession>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Seed a session directly, bypassing `create` (for expiry fixtures).
    pub fn insert(&self, session: PairingSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.pin.clone(), session);
    }
}

#[cfg(test)]
#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, pin: &str) -> Result<PairingSession, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(pin) {
            return Err(StoreError::AlreadyExists);
        }
        let session = PairingSession::new(pin, unix_now());
        sessions.insert(pin.to_owned(), session.clone());
        Ok(session)
    }

    async fn get(&self, pin: &str) -> Result<PairingSession, StoreError> {
        self.sessions
            .lock()
            .unwrap()
            .get(pin)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set_pc_connected(&self, pin: &str, connected: bool) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(pin).ok_or(StoreError::NotFound)?;
        session.pc_connected = connected;
        session.last_activity_at = unix_now();
        Ok(())
    }

    async fn set_user_connected(&self, pin: &str, connected: bool) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(pin).ok_or(StoreError::NotFound)?;
        session.user_connected = connected;
        Ok(())
    }

    async fn set_base_directory(&self, pin: &str, path: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(pin).ok_or(StoreError::NotFound)?;
        session.base_directory = Some(path.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("sessions.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let (_dir, store) = open_store().await;

        let session = store.create("1234").await.unwrap();
        assert_eq!(session.pin, "1234");
        assert!(!session.pc_connected);
        assert!(!session.user_connected);
        assert!(session.base_directory.is_none());
        assert_eq!(session.expires_at - session.created_at, SESSION_TTL_SECS);

        let loaded = store.get("1234").await.unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let (_dir, store) = open_store().await;

        store.create("1234").await.unwrap();
        assert!(matches!(
            store.create("1234").await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let (_dir, store) = open_store().await;
        assert!(matches!(store.get("0000").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_pc_connected_refreshes_activity() {
        let (_dir, store) = open_store().await;

        let session = store.create("1234").await.unwrap();
        store.set_pc_connected("1234", true).await.unwrap();

        let loaded = store.get("1234").await.unwrap();
        assert!(loaded.pc_connected);
        assert!(loaded.last_activity_at >= session.created_at);

        store.set_pc_connected("1234", false).await.unwrap();
        assert!(!store.get("1234").await.unwrap().pc_connected);
    }

    #[tokio::test]
    async fn test_user_connected_flag() {
        let (_dir, store) = open_store().await;

        store.create("1234").await.unwrap();
        store.set_user_connected("1234", true).await.unwrap();
        assert!(store.get("1234").await.unwrap().user_connected);
    }

    #[tokio::test]
    async fn test_base_directory_overwrites() {
        let (_dir, store) = open_store().await;

        store.create("1234").await.unwrap();
        store.set_base_directory("1234", "/home/x").await.unwrap();
        assert_eq!(
            store.get("1234").await.unwrap().base_directory.as_deref(),
            Some("/home/x")
        );

        store.set_base_directory("1234", "/home/y").await.unwrap();
        assert_eq!(
            store.get("1234").await.unwrap().base_directory.as_deref(),
            Some("/home/y")
        );
    }

    #[tokio::test]
    async fn test_mutations_on_unknown_pin() {
        let (_dir, store) = open_store().await;
        assert!(matches!(
            store.set_pc_connected("0000", true).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.set_base_directory("0000", "/x").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_registration_distinct_pins() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteStore::new(dir.path().join("sessions.db"))
                .await
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let pin = format!("pin-{}", i);
                store.create(&pin).await.unwrap();
                store.set_base_directory(&pin, &format!("/home/{}", i))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for i in 0..8 {
            let session = store.get(&format!("pin-{}", i)).await.unwrap();
            assert_eq!(
                session.base_directory.as_deref(),
                Some(format!("/home/{}", i).as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store.create("1234").await.unwrap();
            store.set_base_directory("1234", "/home/x").await.unwrap();
        }

        let store = SqliteStore::new(&path).await.unwrap();
        let session = store.get("1234").await.unwrap();
        assert_eq!(session.base_directory.as_deref(), Some("/home/x"));
    }
}
