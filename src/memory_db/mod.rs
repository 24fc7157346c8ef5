//! Memory database: SQLite-based storage for sessions, tiered
//! messages, episodic chunks, and per-user facts, wired over one
//! shared `r2d2` connection pool.

pub mod episodic_store;
pub mod fact_store;
pub mod message_store;
pub mod migration;
pub mod schema;

pub use episodic_store::{EpisodicStore, SqliteEpisodicStore};
pub use fact_store::{FactStore, SqliteFactStore};
pub use message_store::{InMemoryMessageStore, MessageStore, SqliteMessageStore};
pub use migration::MigrationManager;
pub use schema::DatabaseStats;

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::info;

use crate::domain::{Session, SessionId, UserId};

pub struct MemoryDatabase {
    pub messages: Arc<dyn MessageStore>,
    pub episodic: Arc<dyn EpisodicStore>,
    pub facts: Arc<dyn FactStore>,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {e}"))?;

        {
            let mut conn = pool.get()?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        }

        let pool = Arc::new(pool);
        info!("Memory database initialized successfully");
        Ok(Self::from_pool(pool))
    }

    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(5).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(schema::SCHEMA_SQL)?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            messages: Arc::new(SqliteMessageStore::new(Arc::clone(&pool))),
            episodic: Arc::new(SqliteEpisodicStore::new(Arc::clone(&pool))),
            facts: Arc::new(SqliteFactStore::new(Arc::clone(&pool))),
            pool,
        }
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        migration::get_database_stats(&conn)
    }

    pub fn cleanup_old_sessions(&self, older_than_days: i32) -> anyhow::Result<usize> {
        let mut conn = self.pool.get()?;
        let mut migrator = migration::MigrationManager::new(&mut conn);
        migrator.cleanup_old_sessions(older_than_days)
    }

    pub fn create_session(&self, session_id: &SessionId, user_id: &UserId, title: Option<&str>) -> anyhow::Result<()> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (id, user_id, title, created_at, last_activity_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![session_id, user_id, title, now],
        )?;
        Ok(())
    }

    pub fn touch_session(&self, session_id: &SessionId) -> anyhow::Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE sessions SET last_activity_at = ?2 WHERE id = ?1",
            params![session_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &SessionId) -> anyhow::Result<Option<Session>> {
        let conn = self.pool.get()?;
        let result = conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![session_id], |row| {
            let created_at_str: String = row.get("created_at")?;
            let last_activity_str: String = row.get("last_activity_at")?;
            let metadata_str: String = row.get("metadata")?;
            Ok(Session {
                id: row.get("id")?,
                user_id: row.get("user_id")?,
                title: row.get("title")?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
                last_activity_at: chrono::DateTime::parse_from_rfc3339(&last_activity_str)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
                metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
            })
        });
        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_sessions_for_user(&self, user_id: &UserId) -> anyhow::Result<Vec<Session>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE user_id = ?1 ORDER BY last_activity_at DESC")?;
        let rows = stmt.query_map(params![user_id], |row| {
            let created_at_str: String = row.get("created_at")?;
            let last_activity_str: String = row.get("last_activity_at")?;
            let metadata_str: String = row.get("metadata")?;
            Ok(Session {
                id: row.get("id")?,
                user_id: row.get("user_id")?,
                title: row.get("title")?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
                last_activity_at: chrono::DateTime::parse_from_rfc3339(&last_activity_str)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
                metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_session(&self, session_id: &SessionId) -> anyhow::Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}
