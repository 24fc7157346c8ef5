//! Web Search Gateway: a narrow async client to an external
//! search provider, returning pre-formatted result text rather than
//! structured hits — the orchestrator just needs a string to splice
//! into `WEB_SEARCH_RESULTS`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> CoreResult<String>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Deserialize)]
struct SearchResultItem {
    title: String,
    url: String,
    #[serde(default)]
    excerpt: String,
}

pub struct HttpSearchGateway {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpSearchGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SearchGateway for HttpSearchGateway {
    async fn search(&self, query: &str, max_results: usize) -> CoreResult<String> {
        let response = self
            .http_client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("max_results", &max_results.to_string())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::UpstreamTimeout(format!("search gateway timed out: {e}"))
                } else {
                    CoreError::UpstreamNetwork(anyhow::anyhow!(e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::UpstreamMalformed(format!("search gateway returned {status}: {body}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CoreError::UpstreamMalformed(format!("failed to parse search response: {e}")))?;

        Ok(format_results(&parsed))
    }
}

fn format_results(parsed: &SearchResponse) -> String {
    let mut out = String::new();
    if let Some(answer) = &parsed.answer {
        if !answer.trim().is_empty() {
            out.push_str(answer.trim());
            out.push_str("\n\n");
        }
    }
    for (i, item) in parsed.results.iter().enumerate() {
        out.push_str(&format!("{}. {} ({})\n", i + 1, item.title, item.url));
        if !item.excerpt.trim().is_empty() {
            out.push_str(&format!("   {}\n", item.excerpt.trim()));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_answer_and_results() {
        let parsed = SearchResponse {
            answer: Some("Rust 1.80 was released in July 2024.".to_string()),
            results: vec![SearchResultItem {
                title: "Rust 1.80.0 release notes".to_string(),
                url: "https://example.com/rust-1.80".to_string(),
                excerpt: "Announcing Rust 1.80.0...".to_string(),
            }],
        };
        let text = format_results(&parsed);
        assert!(text.starts_with("Rust 1.80"));
        assert!(text.contains("1. Rust 1.80.0 release notes"));
    }

    #[test]
    fn formats_empty_results_without_panicking() {
        let parsed = SearchResponse { answer: None, results: vec![] };
        assert_eq!(format_results(&parsed), "");
    }
}
