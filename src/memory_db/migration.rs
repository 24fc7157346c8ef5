//! Database initialization and maintenance: idempotent
//! `CREATE TABLE IF NOT EXISTS` schema application via
//! `schema::SCHEMA_SQL`, plus periodic housekeeping (old-session
//! cleanup, `ANALYZE`, incremental vacuum, integrity check).

use rusqlite::{Connection, Result};
use std::path::Path;
use tracing::info;

use crate::memory_db::schema;

pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    pub fn initialize_database(&mut self) -> Result<()> {
        info!("Initializing memory database schema...");
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    pub fn create_connection(db_path: &Path) -> Result<Connection> {
        let mut conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        let mut migrator = MigrationManager::new(&mut conn);
        migrator.initialize_database()?;
        Ok(conn)
    }

    pub fn cleanup_old_sessions(&mut self, older_than_days: i32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days as i64);
        let cutoff_str = cutoff.to_rfc3339();
        let deleted = self.conn.execute(
            "DELETE FROM sessions WHERE last_activity_at < ?1",
            [&cutoff_str],
        )?;
        if deleted > 0 {
            info!("Cleaned up {} old sessions", deleted);
            self.conn.execute_batch("VACUUM")?;
        }
        Ok(deleted)
    }
}

pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn get_table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
    }

    let total_sessions = get_table_count(conn, "sessions")?;
    let total_messages = get_table_count(conn, "messages")?;
    let total_episodic_chunks = get_table_count(conn, "episodic_chunks")?;
    let total_users_with_facts = get_table_count(conn, "user_facts")?;

    let database_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(schema::DatabaseStats {
        total_sessions,
        total_messages,
        total_episodic_chunks,
        total_users_with_facts,
        database_size_bytes,
    })
}

pub fn run_maintenance(conn: &mut Connection) -> Result<()> {
    info!("Running database maintenance...");
    conn.execute_batch("ANALYZE")?;
    conn.execute_batch("PRAGMA incremental_vacuum(100)")?;
    conn.execute_batch("PRAGMA integrity_check")?;
    info!("Database maintenance completed");
    Ok(())
}
