//! LLM chat client
//!
//! OpenAI-compatible chat-completions client. The model, endpoint, and
//! key come from the task routing table; aggregator endpoints also get
//! their attribution headers injected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analysis::routing::{route_for, TaskRoute};
use crate::error::{Error, Result};

/// LLM request structure
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Routing-table task name (picks the model and endpoint)
    pub task: String,
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// LLM response structure
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// LLM client trait for abstraction (tests swap in a canned client)
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

// OpenAI-compatible API structures
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// HTTP chat client driven by the task routing table
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    /// When set, every task uses this endpoint (tests point it at a stub)
    base_url_override: Option<String>,
}

impl ChatClient {
    pub fn new() -> Self {
        Self {
            client: crate::http_client::api_client(),
            base_url_override: None,
        }
    }

    /// Route every task to a fixed endpoint (testing or a local proxy)
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: crate::http_client::api_client(),
            base_url_override: Some(base_url),
        }
    }

    fn endpoint(&self, route: &TaskRoute) -> String {
        let base = self
            .base_url_override
            .as_deref()
            .unwrap_or(route.base_url);
        format!("{}/chat/completions", base)
    }
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let route = route_for(&request.task);
        let api_key = route.api_key()?;

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let chat_request = ChatCompletionRequest {
            model: route.model.to_string(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };

        let mut builder = self
            .client
            .post(self.endpoint(&route))
            .bearer_auth(&api_key)
            .header("Content-Type", "application/json");

        for (name, value) in route.extra_headers() {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("LLM request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::Http(format!(
                "LLM API error ({status}): {error_text}"
            )));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse LLM response: {e}")))?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| Error::Other("No choices in LLM response".to_string()))?;

        let usage = chat_response.usage.unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: chat_response.model,
            usage: Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_generate_parses_content() {
        std::env::set_var("OPENROUTER_API_KEY", "test-key");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_header("HTTP-Referer", mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{
                    "model": "deepseek/deepseek-chat",
                    "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
                }"#,
            )
            .create_async()
            .await;

        let client = ChatClient::with_base_url(server.url());
        let response = client
            .generate(LlmRequest {
                task: "sentiment_analysis".into(),
                prompt: "analyze".into(),
                system: None,
                max_tokens: 100,
                temperature: 0.3,
            })
            .await
            .unwrap();

        assert_eq!(response.content, "{\"ok\": true}");
        assert_eq!(response.usage.input_tokens, 12);

        std::env::remove_var("OPENROUTER_API_KEY");
    }

    #[tokio::test]
    #[serial]
    async fn test_generate_surfaces_api_errors() {
        std::env::set_var("OPENROUTER_API_KEY", "test-key");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = ChatClient::with_base_url(server.url());
        let result = client
            .generate(LlmRequest {
                task: "summarization".into(),
                prompt: "x".into(),
                system: None,
                max_tokens: 10,
                temperature: 0.2,
            })
            .await;

        assert!(matches!(result, Err(Error::Http(_))));
        std::env::remove_var("OPENROUTER_API_KEY");
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_key_is_configuration_error() {
        std::env::remove_var("OPENROUTER_API_KEY");

        let client = ChatClient::new();
        let result = client
            .generate(LlmRequest {
                task: "summarization".into(),
                prompt: "x".into(),
                system: None,
                max_tokens: 10,
                temperature: 0.2,
            })
            .await;

        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
