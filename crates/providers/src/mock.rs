//! An in-memory [`LlmProvider`] used by tests and as the default fallback
//! when no real model client is configured. Returns a canned response
//! (or an injected failure) instead of making a network call.

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use conclave_domain::capability::{LlmCapabilities, ToolSupport};
use conclave_domain::error::{Error, Result};
use conclave_domain::stream::{BoxStream, StreamEvent, Usage};
use parking_lot::Mutex;
use std::sync::Arc;

/// Deterministic stand-in for a real model client.
pub struct MockProvider {
    id: String,
    capabilities: LlmCapabilities,
    /// When set, `chat`/`chat_stream` return this error instead of a response.
    fail_with: Mutex<Option<String>>,
    /// Canned response text, echoed back on every call unless `fail_with` is set.
    response: Mutex<String>,
    /// Artificial latency before responding, for testing timeouts/cancellation.
    delay: Mutex<Option<std::time::Duration>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: true,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(4_096),
            },
            fail_with: Mutex::new(None),
            response: Mutex::new("mock response".to_string()),
            delay: Mutex::new(None),
        }
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        *self.response.lock() = text.into();
        self
    }

    /// Sleep for `delay` before returning from `chat`, simulating a slow
    /// model call for timeout/cancellation tests.
    pub fn with_delay(&self, delay: std::time::Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Make every subsequent call fail with the given message, simulating a
    /// provider outage for circuit breaker / health monitor tests.
    pub fn fail_next_calls(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.fail_with.lock() = None;
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        if let Some(delay) = *self.delay.lock() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: reason,
            });
        }
        let content = self.response.lock().clone();
        let prompt_tokens = req
            .messages
            .iter()
            .map(|m| m.content.extract_all_text().len() as u32 / 4)
            .sum();
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens: 16,
                total_tokens: prompt_tokens + 16,
            }),
            model: req.model.unwrap_or_else(|| "mock-model".to_string()),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.chat(req).await?;
        let stream = async_stream::stream! {
            yield Ok(StreamEvent::Token { text: response.content.clone() });
            yield Ok(StreamEvent::Done {
                usage: response.usage,
                finish_reason: response.finish_reason.clone(),
            });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let embeddings = req
            .input
            .iter()
            .map(|text| vec![text.len() as f32; 4])
            .collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

pub fn shared(id: impl Into<String>) -> Arc<MockProvider> {
    Arc::new(MockProvider::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::tool::Message;

    #[tokio::test]
    async fn chat_echoes_configured_response() {
        let provider = MockProvider::new("m1").with_response("hello there");
        let resp = provider
            .chat(ChatRequest {
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.content, "hello there");
    }

    #[tokio::test]
    async fn fail_next_calls_surfaces_provider_error() {
        let provider = MockProvider::new("m1");
        provider.fail_next_calls("simulated outage");
        let err = provider
            .chat(ChatRequest {
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        provider.recover();
        assert!(provider
            .chat(ChatRequest {
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn with_delay_holds_off_the_response() {
        let provider = MockProvider::new("m1").with_response("slow");
        provider.with_delay(std::time::Duration::from_millis(20));
        let start = std::time::Instant::now();
        let resp = provider
            .chat(ChatRequest {
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.content, "slow");
        assert!(start.elapsed() >= std::time::Duration::from_millis(20));
    }
}
