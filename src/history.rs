use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::models::{HistoryEntry, NewHistoryEntry};

/// How many entries a subscription delivers.
pub const HISTORY_LIMIT: usize = 10;

pub type HistoryCallback = Box<dyn Fn(&[HistoryEntry]) + Send + Sync>;

/// Live-feed handle. Dropping it stops delivery.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing behind it.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Append-only audit history for one anonymous identity.
pub trait HistoryStore: Send + Sync {
    fn append(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, PersistenceError>;

    /// Delivers the newest `HISTORY_LIMIT` entries now and again after every change.
    fn subscribe(&self, callback: HistoryCallback) -> Result<Subscription, PersistenceError>;

    /// Picks up changes made outside this store, if the backend can see them.
    fn poll(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

// --- SQLite store ---

struct Shared {
    conn: Mutex<Connection>,
    identity: String,
    listeners: Mutex<Vec<(u64, HistoryCallback)>>,
    next_listener: AtomicU64,
    data_version: Mutex<i64>,
}

#[derive(Clone)]
pub struct SqliteHistoryStore {
    shared: Arc<Shared>,
    path: Option<PathBuf>,
}

impl SqliteHistoryStore {
    pub fn open(path: &Path, identity: &str) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn, identity)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            ..store
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(identity: &str) -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?, identity)
    }

    fn with_connection(conn: Connection, identity: &str) -> Result<Self, PersistenceError> {
        Self::init(&conn)?;
        let data_version = Self::data_version(&conn)?;
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                identity: identity.to_string(),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                data_version: Mutex::new(data_version),
            }),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(conn: &Connection) -> Result<(), PersistenceError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audits (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                job_title TEXT NOT NULL,
                company TEXT NOT NULL DEFAULT '',
                score REAL NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_audits_identity_time ON audits(identity, timestamp);
            "#,
        )?;
        Ok(())
    }

    fn data_version(conn: &Connection) -> Result<i64, PersistenceError> {
        Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
    }

    pub fn recent(&self) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let conn = self.lock_conn()?;
        Self::query_recent(&conn, &self.shared.identity)
    }

    fn query_recent(conn: &Connection, identity: &str) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let mut stmt = conn.prepare(
            "SELECT id, job_title, company, score, summary, timestamp
             FROM audits
             WHERE identity = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![identity, HISTORY_LIMIT as i64], Self::row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
        Ok(HistoryEntry {
            id: row.get(0)?,
            job_title: row.get(1)?,
            company: row.get(2)?,
            score: row.get(3)?,
            summary: row.get(4)?,
            timestamp: row.get(5)?,
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.shared
            .conn
            .lock()
            .map_err(|_| PersistenceError::Unavailable("history connection lock poisoned".to_string()))
    }

    fn notify(&self) -> Result<(), PersistenceError> {
        let entries = self.recent()?;
        let listeners = self
            .shared
            .listeners
            .lock()
            .map_err(|_| PersistenceError::Unavailable("listener lock poisoned".to_string()))?;
        debug!(listeners = listeners.len(), entries = entries.len(), "Delivering history snapshot");
        for (_, callback) in listeners.iter() {
            callback(&entries);
        }
        Ok(())
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, PersistenceError> {
        let id = uuid::Uuid::new_v4().to_string();
        let stored = {
            let conn = self.lock_conn()?;
            let timestamp: String = conn.query_row(
                "INSERT INTO audits (id, identity, job_title, company, score, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING timestamp",
                params![
                    id,
                    self.shared.identity,
                    entry.job_title,
                    entry.company,
                    entry.score,
                    entry.summary
                ],
                |row| row.get(0),
            )?;
            // Our own write doesn't bump data_version for this connection,
            // but refresh it so poll() stays in step.
            if let Ok(mut version) = self.shared.data_version.lock() {
                *version = Self::data_version(&conn)?;
            }
            HistoryEntry {
                id,
                job_title: entry.job_title.clone(),
                company: entry.company.clone(),
                score: entry.score,
                summary: entry.summary.clone(),
                timestamp,
            }
        };

        // The row is committed; a failed refresh only delays listeners.
        if let Err(e) = self.notify() {
            warn!("Saved audit {} but could not refresh listeners: {}", stored.id, e);
        }
        Ok(stored)
    }

    fn subscribe(&self, callback: HistoryCallback) -> Result<Subscription, PersistenceError> {
        let entries = self.recent()?;
        callback(&entries);

        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .map_err(|_| PersistenceError::Unavailable("listener lock poisoned".to_string()))?
            .push((id, callback));

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        Ok(Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                if let Ok(mut listeners) = shared.listeners.lock() {
                    listeners.retain(|(listener, _)| *listener != id);
                }
            }
        }))
    }

    fn poll(&self) -> Result<(), PersistenceError> {
        let changed = {
            let conn = self.lock_conn()?;
            let current = Self::data_version(&conn)?;
            let mut seen = self
                .shared
                .data_version
                .lock()
                .map_err(|_| PersistenceError::Unavailable("version lock poisoned".to_string()))?;
            let changed = *seen != current;
            *seen = current;
            changed
        };
        if changed {
            debug!("History changed outside this session");
            self.notify()?;
        }
        Ok(())
    }
}

// --- Adapter used by the view controller ---

/// Best-effort history. Never fails; with no store it is an empty history.
#[derive(Clone, Default)]
pub struct HistoryAdapter {
    store: Option<Arc<dyn HistoryStore>>,
}

impl HistoryAdapter {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn local_only() -> Self {
        Self { store: None }
    }

    pub fn is_local_only(&self) -> bool {
        self.store.is_none()
    }

    pub fn append(&self, entry: NewHistoryEntry) {
        let Some(store) = &self.store else {
            debug!("Local-only mode, not saving audit history");
            return;
        };
        match store.append(&entry) {
            Ok(saved) => info!(id = %saved.id, "Saved audit to history"),
            Err(e) => warn!("Failed to save history: {}", e),
        }
    }

    pub fn subscribe(&self, callback: HistoryCallback) -> Subscription {
        let Some(store) = &self.store else {
            callback(&[]);
            return Subscription::inert();
        };
        match store.subscribe(callback) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Failed to subscribe to history: {}", e);
                Subscription::inert()
            }
        }
    }

    pub fn poll(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.poll() {
                warn!("Failed to refresh history: {}", e);
            }
        }
    }
}
