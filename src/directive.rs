//! Directive protocol: the bracketed textual commands a model embeds
//! in its reply to request tier upgrades, episodic recall, or web
//! search. All five patterns are precompiled once via `lazy_static`
//! rather than recompiled per call.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TIER_RE: Regex = Regex::new(r"\[REQUEST_TIER:(\d+):([^\]]+)\]").unwrap();
    static ref EPISODIC_RE: Regex = Regex::new(r"\[SEARCH_EPISODIC:([^\]]+)\]").unwrap();
    static ref WEB_RE: Regex = Regex::new(r"\[SEARCH:\s*(.+?)\s*\]").unwrap();
    static ref FETCH_RE: Regex = Regex::new(r"\[FETCH_EPISODE:\s*([\w\-]+)\s*\]").unwrap();
    static ref DEEPER_RE: Regex = Regex::new(r"\[SEARCH_DEEPER_EPISODIC\]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"[ \t]+").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    RequestTier { level: u8, message_id: String },
    SearchEpisodic { query: String },
    Search { query: String },
    FetchEpisode { chunk_id: String },
    SearchDeeperEpisodic,
}

struct Match {
    start: usize,
    end: usize,
    directive: Directive,
}

/// Parses all directives out of `text`, returning them in discovery
/// order alongside the residual text with every directive token
/// stripped.
///
/// A directive token occurring inside a fenced code block is only
/// honored if it is the entire (trimmed) content of its line — a
/// deliberately cheap approximation rather than true fence-awareness.
pub fn parse(text: &str) -> (String, Vec<Directive>) {
    let mut matches = Vec::new();

    for caps in TIER_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if let Ok(level) = caps[1].parse::<u8>() {
            if (1..=3).contains(&level) && line_allows_directive(text, whole.start(), whole.end()) {
                matches.push(Match {
                    start: whole.start(),
                    end: whole.end(),
                    directive: Directive::RequestTier {
                        level,
                        message_id: caps[2].trim().to_string(),
                    },
                });
            }
        }
    }

    for caps in EPISODIC_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if line_allows_directive(text, whole.start(), whole.end()) {
            matches.push(Match {
                start: whole.start(),
                end: whole.end(),
                directive: Directive::SearchEpisodic {
                    query: caps[1].trim().to_string(),
                },
            });
        }
    }

    for caps in WEB_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if line_allows_directive(text, whole.start(), whole.end()) {
            matches.push(Match {
                start: whole.start(),
                end: whole.end(),
                directive: Directive::Search {
                    query: caps[1].trim().to_string(),
                },
            });
        }
    }

    for caps in FETCH_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if line_allows_directive(text, whole.start(), whole.end()) {
            matches.push(Match {
                start: whole.start(),
                end: whole.end(),
                directive: Directive::FetchEpisode {
                    chunk_id: caps[1].trim().to_string(),
                },
            });
        }
    }

    for whole in DEEPER_RE.find_iter(text) {
        if line_allows_directive(text, whole.start(), whole.end()) {
            matches.push(Match {
                start: whole.start(),
                end: whole.end(),
                directive: Directive::SearchDeeperEpisodic,
            });
        }
    }

    matches.sort_by_key(|m| m.start);

    let mut residual = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut directives = Vec::with_capacity(matches.len());
    for m in matches {
        if m.start < cursor {
            // Overlapping match (shouldn't happen across distinct
            // directive kinds); skip it defensively.
            continue;
        }
        residual.push_str(&text[cursor..m.start]);
        cursor = m.end;
        directives.push(m.directive);
    }
    residual.push_str(&text[cursor..]);

    // Only directive-adjacent whitespace needs collapsing (a stripped
    // token often leaves an orphaned run of spaces or a blank line
    // behind). A directive-free reply must come back unchanged so the
    // zero-directive round trip is the identity.
    if directives.is_empty() {
        (residual, directives)
    } else {
        (normalize_whitespace(&residual), directives)
    }
}

/// Strips directives without needing the parsed list.
pub fn strip(text: &str) -> String {
    parse(text).0
}

/// A directive match is honored anywhere in free text; inside a fenced
/// code block it is only honored if its line, trimmed, equals exactly
/// the matched token.
fn line_allows_directive(text: &str, start: usize, end: usize) -> bool {
    if !inside_fence(text, start) {
        return true;
    }
    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[end..].find('\n').map(|i| end + i).unwrap_or(text.len());
    text[line_start..line_end].trim() == text[start..end].trim()
}

fn inside_fence(text: &str, pos: usize) -> bool {
    text[..pos].matches("```").count() % 2 == 1
}

fn normalize_whitespace(text: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(text, " ");
    collapsed
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_directives_is_identity() {
        let text = "Just a plain reply with no brackets at all.";
        let (residual, directives) = parse(text);
        assert_eq!(residual, text);
        assert!(directives.is_empty());
    }

    #[test]
    fn no_directives_preserves_internal_whitespace() {
        let text = "a  b\n\nc   d";
        let (residual, directives) = parse(text);
        assert_eq!(residual, text);
        assert!(directives.is_empty());
    }

    #[test]
    fn parses_tier_upgrade() {
        let (residual, directives) = parse("[REQUEST_TIER:3:m7] Let me check.");
        assert_eq!(residual, "Let me check.");
        assert_eq!(
            directives,
            vec![Directive::RequestTier { level: 3, message_id: "m7".into() }]
        );
    }

    #[test]
    fn parses_multiple_directives_in_discovery_order() {
        let text = "[SEARCH_EPISODIC:kyoto trip] then [SEARCH: weather paris]";
        let (_, directives) = parse(text);
        assert_eq!(
            directives,
            vec![
                Directive::SearchEpisodic { query: "kyoto trip".into() },
                Directive::Search { query: "weather paris".into() },
            ]
        );
    }

    #[test]
    fn deeper_episodic_is_literal() {
        let (residual, directives) = parse("No results. [SEARCH_DEEPER_EPISODIC]");
        assert_eq!(residual, "No results.");
        assert_eq!(directives, vec![Directive::SearchDeeperEpisodic]);
    }

    #[test]
    fn fetch_episode_parses_chunk_id() {
        let (residual, directives) = parse("[FETCH_EPISODE: chunk-42 ] Sure.");
        assert_eq!(residual, "Sure.");
        assert_eq!(directives, vec![Directive::FetchEpisode { chunk_id: "chunk-42".into() }]);
    }

    #[test]
    fn ignores_directive_inside_code_fence_unless_alone_on_line() {
        let text = "```\nlet x = \"[SEARCH: nope]\";\n```";
        let (_, directives) = parse(text);
        assert!(directives.is_empty());

        let text2 = "```\n[SEARCH: yes]\n```";
        let (_, directives2) = parse(text2);
        assert_eq!(directives2, vec![Directive::Search { query: "yes".into() }]);
    }

    #[test]
    fn stripping_twice_is_stable() {
        let text = "[REQUEST_TIER:2:m1] Some   reply.";
        let once = strip(text);
        let twice = strip(&once);
        assert_eq!(once, twice);
    }
}
