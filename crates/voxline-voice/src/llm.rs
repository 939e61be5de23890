//! Streaming language agent over an OpenAI-compatible chat completions API.

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use tracing::debug;

use voxline_core::config::LlmConfig;

use crate::sse::parse_sse_data;

/// Produces the agent's reply to a transcript as a lazy token stream.
///
/// Token production must stop promptly when the returned stream is dropped.
pub trait LanguageAgent: Send + Sync {
    fn stream_reply(
        &self,
        transcript: &str,
        conversation_id: &str,
    ) -> BoxStream<'static, anyhow::Result<String>>;
}

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful voice assistant. Answer briefly; your words are spoken aloud.";

/// Chat-completions client streaming content deltas over SSE.
pub struct OpenAiChat {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiChat {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

/// Pull the content delta out of one streamed chat-completion frame.
fn content_delta(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl LanguageAgent for OpenAiChat {
    fn stream_reply(
        &self,
        transcript: &str,
        conversation_id: &str,
    ) -> BoxStream<'static, anyhow::Result<String>> {
        let client = self.client.clone();
        let config = self.config.clone();
        let transcript = transcript.to_string();
        let conversation_id = conversation_id.to_string();

        let fut = async move {
            let api_key = config
                .resolve_api_key()
                .ok_or_else(|| anyhow::anyhow!("No LLM API key configured"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            let model = config.model.as_deref().unwrap_or("gpt-4o");
            let system_prompt = config
                .system_prompt
                .as_deref()
                .unwrap_or(DEFAULT_SYSTEM_PROMPT);

            debug!(%conversation_id, model, "Starting chat completion stream");

            let resp = client
                .post(format!("{base_url}/chat/completions"))
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&json!({
                    "model": model,
                    "stream": true,
                    "user": conversation_id,
                    "messages": [
                        {"role": "system", "content": system_prompt},
                        {"role": "user", "content": transcript},
                    ],
                }))
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Chat API error {status}: {body}");
            }

            let tokens = parse_sse_data(resp).try_filter_map(|data| async move {
                if data == "[DONE]" {
                    return Ok(None);
                }
                let value: serde_json::Value = serde_json::from_str(&data)
                    .map_err(|e| anyhow::anyhow!("Malformed chat stream frame: {e}"))?;
                Ok(content_delta(&value))
            });

            Ok(tokens)
        };

        futures::stream::once(fut).try_flatten().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_delta() {
        let frame = json!({
            "choices": [{"delta": {"content": "hello"}, "index": 0}]
        });
        assert_eq!(content_delta(&frame).as_deref(), Some("hello"));
    }

    #[test]
    fn skips_frames_without_content() {
        let role_frame = json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert_eq!(content_delta(&role_frame), None);

        let finish_frame = json!({"choices": [{"delta": {}, "finish_reason": "stop"}]});
        assert_eq!(content_delta(&finish_frame), None);

        let empty_delta = json!({"choices": [{"delta": {"content": ""}}]});
        assert_eq!(content_delta(&empty_delta), None);
    }
}
