//! LLM Gateway: a narrow async client to the chat-completion
//! backend over a single non-streaming `complete()` call, with
//! fenced-code unwrapping so the orchestrator and Prompt Builder never
//! see a reply wrapped in markdown fences.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ChatMessage;
use crate::error::{CoreError, CoreResult};

lazy_static! {
    static ref FENCE_RE: Regex = Regex::new(r"(?s)^\s*```(?:\w+)?\s*\n(.*?)\n?\s*```\s*$").unwrap();
}

/// Strips a single leading/trailing fenced code block if the reply is
/// wrapped in exactly one, so the orchestrator and Prompt Builder never
/// see fence markers.
pub fn unwrap_fence(text: &str) -> String {
    if let Some(caps) = FENCE_RE.captures(text.trim()) {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| text.to_string())
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct CompleteOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for CompleteOptions {
    fn default() -> Self {
        Self { max_tokens: 2000, temperature: 0.7, timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone)]
pub struct LlmReply {
    pub content: String,
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], options: CompleteOptions) -> CoreResult<LlmReply>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

pub struct HttpLlmGateway {
    base_url: String,
    model_name: String,
    http_client: reqwest::Client,
}

impl HttpLlmGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            model_name: "assistant-core".to_string(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn complete(&self, messages: &[ChatMessage], options: CompleteOptions) -> CoreResult<LlmReply> {
        let request = ChatCompletionRequest {
            model: &self.model_name,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: false,
        };

        let response = self
            .http_client
            .post(self.completions_url())
            .json(&request)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::UpstreamTimeout(format!("LLM gateway timed out: {e}"))
                } else {
                    CoreError::UpstreamNetwork(anyhow::anyhow!(e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::UpstreamMalformed(format!("LLM gateway returned {status}: {body}")));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::UpstreamMalformed(format!("failed to parse LLM response: {e}")))?;

        let raw = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default();

        Ok(LlmReply { content: unwrap_fence(&raw) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_fence_strips_matched_pair() {
        let wrapped = "```json\n{\"a\":1}\n```";
        assert_eq!(unwrap_fence(wrapped), "{\"a\":1}");
    }

    #[test]
    fn unwrap_fence_strips_language_tag() {
        let wrapped = "```\nhello\n```";
        assert_eq!(unwrap_fence(wrapped), "hello");
    }

    #[test]
    fn unwrap_fence_leaves_plain_text_untouched() {
        let plain = "no fences here, just [REQUEST_TIER:3:42] text";
        assert_eq!(unwrap_fence(plain), plain);
    }
}
