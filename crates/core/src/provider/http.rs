//! OpenAI-compatible chat-completions client.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatMessage, ChatRequest, ChatResponse, MessageRole, ModelProvider, ToolInvocation};
use crate::models::ModelConfig;

/// HTTP provider speaking the `/chat/completions` wire format
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleProvider {
    /// Build a client for the given model config, reading the API key from
    /// the provider's environment variable.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            api_key: config.api_key(),
            model: config.model.clone(),
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .context("API key is not a valid header value")?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    #[tracing::instrument(skip(self, request), fields(endpoint = %self.endpoint))]
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = to_wire(request, &self.model);
        tracing::debug!(model = %body.model, messages = body.messages.len(), "chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP {}: {}", status, text));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .context("Failed to decode chat completion")?;
        from_wire(parsed)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: MessageRole,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

fn to_wire(request: ChatRequest, default_model: &str) -> WireRequest {
    WireRequest {
        model: request
            .model
            .unwrap_or_else(|| default_model.to_string()),
        messages: request.messages.into_iter().map(wire_message).collect(),
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunctionDef {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    },
                })
                .collect()
        }),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

fn wire_message(message: ChatMessage) -> WireMessage {
    let tool_calls: Vec<WireToolCall> = message
        .tool_calls
        .into_iter()
        .map(|call| WireToolCall {
            id: call.id,
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.name,
                arguments: call.arguments.to_string(),
            },
        })
        .collect();
    // Assistant turns that only carry tool calls send a null content
    let content = if message.content.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(message.content)
    };
    WireMessage {
        role: message.role,
        content,
        tool_calls,
        tool_call_id: message.tool_call_id,
    }
}

fn from_wire(response: WireResponse) -> Result<ChatResponse> {
    let reply = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| anyhow!("Missing choices in chat completion"))?;

    let tool_calls = reply
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, call)| ToolInvocation {
            id: if call.id.is_empty() {
                format!("call_{}", i)
            } else {
                call.id
            },
            name: call.function.name,
            arguments: parse_arguments(&call.function.arguments),
        })
        .collect();

    Ok(ChatResponse {
        content: reply.content,
        tool_calls,
    })
}

/// Blank arguments become `{}`; unparseable ones are kept as a raw string so
/// the handler reports the problem back to the model.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolSchema;
    use serde_json::json;

    #[test]
    fn test_request_omits_disabled_tools() {
        let request = ChatRequest::new(vec![ChatMessage::user("plan this")])
            .with_max_tokens(8192)
            .with_temperature(0.1);
        let wire = serde_json::to_value(to_wire(request, "gpt-4o")).unwrap();

        assert_eq!(wire["model"], "gpt-4o");
        assert!(wire.get("tools").is_none());
        assert_eq!(wire["max_tokens"], 8192);
        assert_eq!(wire["messages"][0]["role"], "user");
    }

    #[test]
    fn test_tool_calls_are_stringified() {
        let call = ToolInvocation {
            id: "c1".into(),
            name: "file_read".into(),
            arguments: json!({"path": "a.txt"}),
        };
        let request = ChatRequest::new(vec![
            ChatMessage::assistant_with_tools("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "hello"),
        ])
        .with_tools(vec![ToolSchema {
            name: "file_read".into(),
            description: "Read a file".into(),
            parameters: json!({"type": "object"}),
        }])
        .with_model(Some("m".into()));
        let wire = serde_json::to_value(to_wire(request, "ignored")).unwrap();

        assert_eq!(wire["model"], "m");
        assert!(wire["messages"][0]["content"].is_null());
        let args = wire["messages"][0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(args).unwrap(), json!({"path": "a.txt"}));
        assert_eq!(wire["messages"][1]["tool_call_id"], "c1");
        assert_eq!(wire["tools"][0]["type"], "function");
    }

    #[test]
    fn test_response_parsing() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "x", "type": "function", "function": {"name": "a", "arguments": "{\"k\":1}"}},
                        {"function": {"name": "b", "arguments": ""}}
                    ]
                }
            }]
        });
        let parsed = from_wire(serde_json::from_value(raw).unwrap()).unwrap();

        assert!(parsed.content.is_none());
        assert_eq!(parsed.tool_calls[0].arguments, json!({"k": 1}));
        assert_eq!(parsed.tool_calls[1].id, "call_1");
        assert_eq!(parsed.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn test_missing_choices_is_error() {
        let parsed = from_wire(serde_json::from_value(json!({"choices": []})).unwrap());
        assert!(parsed.is_err());
    }
}
