//! SQLite schema for the tiered memory model.

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT,
    created_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    content_full TEXT NOT NULL,
    content_medium TEXT NOT NULL,
    content_short TEXT NOT NULL,
    required_tier INTEGER NOT NULL DEFAULT 1,
    memory_status TEXT NOT NULL DEFAULT 'contextual',
    importance_score INTEGER NOT NULL DEFAULT 0,
    was_recalled INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_messages_session_status ON messages (session_id, memory_status);
CREATE INDEX IF NOT EXISTS idx_messages_session_timestamp ON messages (session_id, timestamp);

CREATE TABLE IF NOT EXISTS episodic_chunks (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    raw_turns TEXT NOT NULL,
    summary TEXT NOT NULL,
    summary_failed INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_episodic_user_session ON episodic_chunks (user_id, session_id);

CREATE TABLE IF NOT EXISTS user_facts (
    user_id TEXT PRIMARY KEY,
    facts TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);
";

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_episodic_chunks: i64,
    pub total_users_with_facts: i64,
    pub database_size_bytes: i64,
}
