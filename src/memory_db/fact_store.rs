//! Fact Store: per-user durable facts, deterministic + LLM
//! extraction, persona pinning, and forget-command handling. Persona
//! facts use a `CRITICAL_PERSONA:` prefix and replace rather than
//! append, so at most one persona fact survives per batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::params;

use crate::domain::ChatMessage;
use crate::error::{CoreError, CoreResult};
use crate::gateways::llm_gateway::{CompleteOptions, LlmGateway};

const PERSONA_PREFIX: &str = "CRITICAL_PERSONA:";

struct FactPattern {
    re: Regex,
    template: &'static str,
}

lazy_static! {
    static ref DETERMINISTIC_PATTERNS: Vec<FactPattern> = vec![
        FactPattern {
            re: Regex::new(r"(?i)\bmy name is ([A-Za-z][\w .'-]{1,40})\b").unwrap(),
            template: "User's name is {0}.",
        },
        FactPattern {
            re: Regex::new(r"(?i)\bi (?:live|am living|reside) in ([A-Za-z][\w ,.'-]{1,60})\b").unwrap(),
            template: "User lives in {0}.",
        },
        FactPattern {
            re: Regex::new(r"(?i)\bi(?:'m| am) working on ([\w .,'-]{2,80})\b").unwrap(),
            template: "User is working on {0}.",
        },
        FactPattern {
            re: Regex::new(r"(?i)\bi (?:enjoy|like|love) ([\w .,'-]{2,60})\b").unwrap(),
            template: "User enjoys {0}.",
        },
        FactPattern {
            re: Regex::new(r"(?i)\bi (?:use|code in|write) ([A-Za-z][\w+#. -]{1,40})\b").unwrap(),
            template: "User uses {0}.",
        },
        FactPattern {
            re: Regex::new(r"(?i)\b(?:i have a deadline|due) (?:on|by) ([\w ,.'-]{2,40})\b").unwrap(),
            template: "User has a deadline on {0}.",
        },
    ];
    static ref PERSONA_RE: Regex =
        Regex::new(r"(?i)\b(?:act as|pretend (?:to be|you are)|roleplay as|you are now)\s+([A-Za-z][\w .'-]{1,60})\b")
            .unwrap();
    static ref FORGET_RE: Regex = Regex::new(r"(?i)\bforget\s+(?:that\s+)?(.+)$").unwrap();
    static ref BRACKET_TOKEN_RE: Regex = Regex::new(r"\[[^\]]*\]").unwrap();
    static ref PRONOUN_PREFIX_RE: Regex = Regex::new(r"(?i)^(?:my|i'm|i am|i)\s+").unwrap();
    static ref COPULA_RE: Regex = Regex::new(r"(?i)\s+(?:is|are|was|were)\s+").unwrap();
}

/// Normalizes a forget command's target phrase into the third-person
/// `"User ..."` form the deterministic templates store facts in, so
/// `forget` can match against them by substring.
///
/// First tries the same patterns `extract_deterministic` uses to
/// produce facts in the first place — if the target matches one, the
/// exact templated fact string is the needle, guaranteeing a match.
/// Otherwise falls back to the original implementation's looser
/// normalization: fold the leading pronoun into `User` and drop
/// copula verbs, per `contextual.py`'s `process_forget_command`.
fn normalize_forget_target(raw_tail: &str) -> String {
    for pattern in DETERMINISTIC_PATTERNS.iter() {
        if let Some(caps) = pattern.re.captures(raw_tail) {
            if let Some(m) = caps.get(1) {
                return pattern.template.replace("{0}", m.as_str().trim()).to_lowercase();
            }
        }
    }

    let lower = raw_tail.to_lowercase();
    let with_user = PRONOUN_PREFIX_RE.replace(&lower, "user ");
    COPULA_RE.replace_all(&with_user, " ").trim().to_string()
}

/// Applies the six deterministic first-person patterns plus the
/// persona/roleplay pattern to the combined user+assistant text of one
/// turn. The persona fact, if present, always replaces rather than
/// appends, so at most one persona fact survives per batch.
pub fn extract_deterministic(user_text: &str, assistant_text: &str) -> Vec<String> {
    let mut facts = Vec::new();
    for text in [user_text, assistant_text] {
        for pattern in DETERMINISTIC_PATTERNS.iter() {
            if let Some(caps) = pattern.re.captures(text) {
                if let Some(m) = caps.get(1) {
                    facts.push(pattern.template.replace("{0}", m.as_str().trim()));
                }
            }
        }
        if let Some(caps) = PERSONA_RE.captures(text) {
            if let Some(m) = caps.get(1) {
                facts.push(format!(
                    "{PERSONA_PREFIX} You must consistently roleplay as {} throughout the entire conversation until explicitly told to stop.",
                    m.as_str().trim()
                ));
            }
        }
    }
    facts
}

/// Returns the pattern to forget (trimmed, lowercased) if `text` is a
/// forget command, per the orchestrator's `Extract`-state short-circuit.
pub fn detect_forget_command(text: &str) -> Option<String> {
    FORGET_RE.captures(text.trim()).and_then(|caps| {
        caps.get(1).map(|m| normalize_forget_target(m.as_str().trim().trim_end_matches(['.', '?', '!'])))
    })
}

fn sanitize(facts: Vec<String>) -> Vec<String> {
    let mut seen_persona = false;
    let mut out: Vec<String> = Vec::new();
    let mut persona_fact: Option<String> = None;

    for fact in facts {
        let cleaned = BRACKET_TOKEN_RE.replace_all(&fact, "").trim().to_string();
        if cleaned.chars().count() < 3 {
            continue;
        }
        if cleaned.starts_with(PERSONA_PREFIX) {
            persona_fact = Some(cleaned);
            seen_persona = true;
            continue;
        }
        if !out.contains(&cleaned) {
            out.push(cleaned);
        }
    }

    if seen_persona {
        let mut with_persona = vec![persona_fact.unwrap()];
        with_persona.extend(out);
        with_persona
    } else {
        out
    }
}

const EXTRACTION_PROMPT_PREFIX: &str = "Analyze the following exchange. Identify any facts, preferences, or \
key information about the user that should be remembered for future interactions. Consider names, locations, \
preferences, project details, personal facts, dates, and anything a personal assistant should remember. \
Respond with a JSON array of short fact strings only, no other text. If there is nothing worth remembering, \
respond with an empty array.\n\n";

#[async_trait]
pub trait FactStore: Send + Sync {
    async fn load(&self, user_id: &str) -> CoreResult<Vec<String>>;
    async fn save(&self, user_id: &str, facts: Vec<String>) -> CoreResult<()>;
    async fn extract(
        &self,
        user_text: &str,
        assistant_text: &str,
        llm: &dyn LlmGateway,
    ) -> CoreResult<Vec<String>>;
    async fn forget(&self, user_id: &str, pattern: &str) -> CoreResult<usize>;
    async fn format(&self, user_id: &str) -> CoreResult<String>;
}

pub struct SqliteFactStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteFactStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactStore for SqliteFactStore {
    async fn load(&self, user_id: &str) -> CoreResult<Vec<String>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let facts = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let json: Option<String> = conn
                .query_row("SELECT facts FROM user_facts WHERE user_id = ?1", params![user_id], |r| r.get(0))
                .ok();
            Ok::<_, anyhow::Error>(json)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)?;

        match facts {
            Some(json) => serde_json::from_str(&json).map_err(|e| CoreError::internal(e)),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, user_id: &str, facts: Vec<String>) -> CoreResult<()> {
        let sanitized = sanitize(facts);
        let json = serde_json::to_string(&sanitized).map_err(|e| CoreError::internal(e))?;
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            conn.execute(
                "INSERT INTO user_facts (user_id, facts, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET facts = excluded.facts, updated_at = excluded.updated_at",
                params![user_id, json, Utc::now().to_rfc3339()],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn extract(
        &self,
        user_text: &str,
        assistant_text: &str,
        llm: &dyn LlmGateway,
    ) -> CoreResult<Vec<String>> {
        let mut facts = extract_deterministic(user_text, assistant_text);

        let prompt = format!("{EXTRACTION_PROMPT_PREFIX}User: {user_text}\nAssistant: {assistant_text}");
        let messages = vec![ChatMessage { role: "user".to_string(), content: prompt }];
        match llm.complete(&messages, CompleteOptions::default()).await {
            Ok(reply) => {
                if let Ok(extra) = serde_json::from_str::<Vec<String>>(reply.content.trim()) {
                    facts.extend(extra);
                } else {
                    tracing::debug!("LLM fact extraction returned non-JSON, skipping");
                }
            }
            Err(e) => tracing::warn!("LLM fact extraction failed: {e}"),
        }

        Ok(sanitize(facts))
    }

    async fn forget(&self, user_id: &str, pattern: &str) -> CoreResult<usize> {
        let needle = pattern.to_lowercase();
        let existing = self.load(user_id).await?;
        let before = existing.len();
        let kept: Vec<String> = existing.into_iter().filter(|f| !f.to_lowercase().contains(&needle)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.save(user_id, kept).await?;
        }
        Ok(removed)
    }

    async fn format(&self, user_id: &str) -> CoreResult<String> {
        let facts = self.load(user_id).await?;
        if facts.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::new();
        let mut rest = &facts[..];
        if let Some(first) = facts.first() {
            if first.starts_with(PERSONA_PREFIX) {
                out.push_str("**CRITICAL CONTEXT - MUST MAINTAIN THROUGHOUT CONVERSATION:**\n");
                out.push_str(first.trim_start_matches(PERSONA_PREFIX).trim());
                out.push('\n');
                rest = &facts[1..];
            }
        }
        if !rest.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            for fact in rest {
                out.push_str(&format!("- {fact}\n"));
            }
        }
        Ok(out.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_and_location() {
        let facts = extract_deterministic("My name is Priya and I live in Austin, Texas.", "");
        assert!(facts.iter().any(|f| f == "User's name is Priya."));
        assert!(facts.iter().any(|f| f.contains("Austin")));
    }

    #[test]
    fn persona_pattern_uses_pinned_prefix() {
        let facts = extract_deterministic("Pretend you are a grumpy pirate captain", "");
        assert_eq!(facts.len(), 1);
        assert!(facts[0].starts_with(PERSONA_PREFIX));
    }

    #[test]
    fn sanitize_pins_persona_first_and_dedups() {
        let facts = vec![
            "User enjoys hiking.".to_string(),
            "User enjoys hiking.".to_string(),
            format!("{PERSONA_PREFIX} roleplay as a wizard"),
            "ab".to_string(),
        ];
        let sanitized = sanitize(facts);
        assert_eq!(sanitized.len(), 2);
        assert!(sanitized[0].starts_with(PERSONA_PREFIX));
    }

    #[test]
    fn sanitize_strips_bracket_tokens() {
        let facts = vec!["User likes [REQUEST_TIER:3:1] cooking.".to_string()];
        let sanitized = sanitize(facts);
        assert_eq!(sanitized[0], "User likes  cooking.");
    }

    #[test]
    fn forget_command_detection_extracts_pattern() {
        assert_eq!(
            detect_forget_command("Forget that I live in Austin."),
            Some("user lives in austin.".to_string())
        );
        assert_eq!(detect_forget_command("what's the weather"), None);
    }

    #[test]
    fn forget_command_matches_stored_third_person_fact() {
        let needle = detect_forget_command("forget that I live in Kyoto").unwrap();
        let facts = vec!["User lives in Kyoto.".to_string(), "User enjoys hiking.".to_string()];
        let kept: Vec<String> = facts.into_iter().filter(|f| !f.to_lowercase().contains(&needle)).collect();
        assert_eq!(kept, vec!["User enjoys hiking.".to_string()]);
    }

    #[test]
    fn forget_command_falls_back_to_pronoun_normalization_without_a_template_match() {
        let needle = detect_forget_command("forget that my favorite color is blue").unwrap();
        assert!(needle.starts_with("user"));
        assert!(!needle.contains(" is "));
    }
}
