// SQLite session index

use super::SessionDescriptor;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// The external store finalization reports successful sessions to
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a descriptor
    fn save_session(&self, descriptor: &SessionDescriptor) -> anyhow::Result<()>;

    fn count_sessions(&self) -> anyhow::Result<usize>;

    fn session_exists(&self, id: &str) -> anyhow::Result<bool>;

    /// All sessions, newest first
    fn list_sessions(&self) -> anyhow::Result<Vec<SessionDescriptor>>;

    fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionDescriptor>>;
}

/// Default database location: `<data dir>/arcapture/sessions.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("arcapture")
        .join("sessions.db")
}

/// Session database
///
/// Wraps Connection in a parking_lot::Mutex since rusqlite::Connection is not Sync.
/// parking_lot's mutex does not poison, so one panicked writer does not make
/// every later query fail.
pub struct SessionDatabase {
    conn: Mutex<Connection>,
}

impl SessionDatabase {
    /// Open or create the session database
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (fallback when file database fails)
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        Ok(db)
    }

    /// Open the file database, falling back to memory with a warning
    pub fn open_or_in_memory(db_path: &Path) -> anyhow::Result<Self> {
        match Self::open(db_path) {
            Ok(db) => Ok(db),
            Err(e) => {
                log::warn!("Failed to open session database {:?}: {}", db_path, e);
                log::warn!("Using in-memory database - sessions will not persist across restarts");
                Self::open_in_memory()
            }
        }
    }

    /// Initialize database schema
    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                duration_secs REAL NOT NULL,
                rgb_path TEXT NOT NULL,
                depth_path TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<SessionDescriptor> {
        let created_str: String = row.get(2)?;
        let created_at = DateTime::parse_from_rfc3339(&created_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                log::warn!("Failed to parse timestamp '{}': {}, using current time", created_str, e);
                Utc::now()
            });
        let rgb_path: String = row.get(4)?;
        let depth_path: String = row.get(5)?;

        Ok(SessionDescriptor {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at,
            duration_secs: row.get(3)?,
            rgb_file_path: PathBuf::from(rgb_path),
            depth_file_path: PathBuf::from(depth_path),
        })
    }
}

impl MetadataStore for SessionDatabase {
    fn save_session(&self, d: &SessionDescriptor) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO sessions (id, name, created_at, duration_secs, rgb_path, depth_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                created_at = excluded.created_at,
                duration_secs = excluded.duration_secs,
                rgb_path = excluded.rgb_path,
                depth_path = excluded.depth_path
            "#,
            params![
                d.id,
                d.name,
                d.created_at.to_rfc3339(),
                d.duration_secs,
                d.rgb_file_path.to_string_lossy().to_string(),
                d.depth_file_path.to_string_lossy().to_string(),
            ],
        )?;
        Ok(())
    }

    fn count_sessions(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn session_exists(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_sessions(&self) -> anyhow::Result<Vec<SessionDescriptor>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, duration_secs, rgb_path, depth_path
             FROM sessions ORDER BY created_at DESC",
        )?;

        let mut sessions = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            sessions.push(Self::map_session_row(row)?);
        }
        Ok(sessions)
    }

    fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionDescriptor>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT id, name, created_at, duration_secs, rgb_path, depth_path
                 FROM sessions WHERE id = ?1",
                params![id],
                Self::map_session_row,
            )
            .optional()?;
        Ok(session)
    }
}
