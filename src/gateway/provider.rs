use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::config::ProviderConfig;
use crate::types::{ContentPart, Message, Role, Usage};
use crate::{GatewayError, Result};

const MAX_PROVIDER_ERROR_BODY_CHARS: usize = 4 * 1024;

/// One chat completion call, already routed and sanitized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Upstream model endpoint. Implementations make a single attempt; the
/// dispatcher does not retry.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("headers", &"<redacted>")
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::invalid_config(format!("provider http client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: None,
            headers: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "provider api key is not set; sending unauthenticated requests"
            );
        }

        let mut out = Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?
        .with_headers(config.headers.clone());
        out.api_key = api_key;
        Ok(out)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }

    fn request_body(request: &ProviderRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let mut body = Map::<String, Value>::new();
        body.insert("model".to_string(), Value::String(request.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert("temperature".to_string(), json!(request.temperature));
        if request.max_tokens > 0 {
            body.insert("max_tokens".to_string(), json!(request.max_tokens));
        }
        body.insert("stream".to_string(), Value::Bool(false));
        Value::Object(body)
    }

    fn parse_usage(value: &Value) -> Option<Usage> {
        let obj = value.as_object()?;
        let input = obj.get("prompt_tokens").and_then(Value::as_u64);
        let output = obj.get("completion_tokens").and_then(Value::as_u64);
        if input.is_none() && output.is_none() {
            return None;
        }
        let mut usage = Usage::new(input.unwrap_or(0), output.unwrap_or(0));
        if let Some(total) = obj.get("total_tokens").and_then(Value::as_u64) {
            usage.total_tokens = total;
        }
        Some(usage)
    }
}

fn message_to_openai(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let has_images = message
        .content
        .iter()
        .any(|part| matches!(part, ContentPart::Image { .. }));
    let content = if has_images {
        Value::Array(
            message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::Image { url } => {
                        json!({ "type": "image_url", "image_url": { "url": url } })
                    }
                })
                .collect(),
        )
    } else {
        Value::String(message.text())
    };
    json!({ "role": role, "content": content })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatChoice {
    #[serde(default)]
    message: ChatMessage,
}

#[derive(Debug, Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let mut req = self
            .http
            .post(self.chat_completions_url())
            .json(&Self::request_body(request));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_PROVIDER_ERROR_BODY_CHARS).collect();
            return Err(GatewayError::Provider {
                message: format!("provider status {status}: {body}"),
                status: Some(status.as_u16()),
                usage: None,
            });
        }

        let parsed = response
            .json::<ChatCompletionsResponse>()
            .await
            .map_err(|err| GatewayError::Provider {
                message: format!("provider response decode error: {err}"),
                status: None,
                usage: None,
            })?;
        let usage = parsed.usage.as_ref().and_then(Self::parse_usage);
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(GatewayError::Provider {
                message: "provider response has no choices".to_string(),
                status: None,
                usage,
            });
        };

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: parsed.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_messages_use_string_content() {
        let request = ProviderRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::system("be brief"), Message::user("hello")],
            max_tokens: 0,
            temperature: 0.2,
        };
        let body = OpenAiCompatibleProvider::request_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn image_messages_use_parts() {
        let message = Message::user("what is this").with_images(&["https://img/1.png".to_string()]);
        let value = message_to_openai(&message);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(value["content"][1]["image_url"]["url"], "https://img/1.png");
    }

    #[test]
    fn parses_usage_fields() {
        let usage = OpenAiCompatibleProvider::parse_usage(&json!({
            "prompt_tokens": 12,
            "completion_tokens": 30
        }))
        .expect("usage");
        assert_eq!(usage, Usage::new(12, 30));
        assert!(OpenAiCompatibleProvider::parse_usage(&json!({})).is_none());
    }

    #[test]
    fn chat_completions_url_is_normalized() {
        let provider =
            OpenAiCompatibleProvider::new("http://localhost:1/v1/", Duration::from_secs(1))
                .expect("client");
        assert_eq!(
            provider.chat_completions_url(),
            "http://localhost:1/v1/chat/completions"
        );
    }
}
