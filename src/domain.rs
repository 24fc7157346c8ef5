//! Core data model: messages, sessions, episodic chunks, and the
//! plain chat message shape exchanged with the LLM/search gateways.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MessageId = i64;
pub type SessionId = String;
pub type UserId = String;
pub type ChunkId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Contextual,
    Episodic,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Contextual => "contextual",
            MemoryStatus::Episodic => "episodic",
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contextual" => Ok(MemoryStatus::Contextual),
            "episodic" => Ok(MemoryStatus::Episodic),
            other => Err(anyhow::anyhow!("unknown memory status: {other}")),
        }
    }
}

/// One dialogue turn atom, the tiered message of the memory model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub content_full: String,
    pub content_medium: String,
    pub content_short: String,
    pub required_tier: u8,
    pub memory_status: MemoryStatus,
    pub importance_score: i64,
    pub was_recalled: bool,
}

impl Message {
    /// The content at the message's current `required_tier`.
    pub fn content_at_required_tier(&self) -> &str {
        match self.required_tier {
            1 => &self.content_short,
            2 => &self.content_medium,
            _ => &self.content_full,
        }
    }

    pub fn content_at_tier(&self, tier: u8) -> &str {
        match tier {
            1 => &self.content_short,
            2 => &self.content_medium,
            _ => &self.content_full,
        }
    }
}

/// Parameters for creating a new message; the store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: Role,
    pub content_full: String,
    pub content_medium: String,
    pub content_short: String,
    pub required_tier: u8,
    pub memory_status: MemoryStatus,
    pub importance_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// One archived (user input, assistant full reply) pairing inside an
/// episodic chunk's `raw_turns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_message_id: MessageId,
    pub user_content: String,
    pub assistant_message_id: MessageId,
    pub assistant_content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicChunk {
    pub id: ChunkId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub raw_turns: Vec<Turn>,
    pub summary: String,
    pub summary_failed: bool,
}

#[derive(Debug, Clone)]
pub struct NewEpisodicChunk {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub raw_turns: Vec<Turn>,
}

/// A scored episodic retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicHit {
    pub score: f64,
    pub chunk_id: ChunkId,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// The plain wire-format chat message exchanged with the LLM gateway,
/// distinct from the richer persisted `Message` above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Runtime, in-memory session context held while a session is active.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub current_summary: String,
}
