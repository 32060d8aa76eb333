use std::env;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use worldbox_lanes::Superseded;
use worldbox_model::ToolRegistry;

use crate::collaborators::{ChatCompleter, ChatMessage, ChatRequest, ImagePainter, Role};

/// Environment variable naming the chat-completions endpoint.
pub const LLM_ENDPOINT_ENV: &str = "WORLDBOX_LLM_ENDPOINT";
/// Environment variable carrying the chat API key.
pub const LLM_API_KEY_ENV: &str = "WORLDBOX_LLM_API_KEY";
/// Environment variable naming the image-generation endpoint.
pub const IMAGE_ENDPOINT_ENV: &str = "WORLDBOX_IMAGE_ENDPOINT";
/// Environment variable carrying the image API key.
pub const IMAGE_API_KEY_ENV: &str = "WORLDBOX_IMAGE_API_KEY";

const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:4000/v1/chat/completions";
const DEFAULT_IMAGE_ENDPOINT: &str = "http://127.0.0.1:4000/v1/images/generations";
const MAX_TOOL_ROUNDS: usize = 4;

/// Chat collaborator speaking an OpenAI-style chat-completions protocol.
pub struct HttpChatClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatClient {
    /// Creates a client for an explicit endpoint.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("worldbox/alpha")
            .build()
            .context("building http chat client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Creates a client from the environment, with local defaults.
    pub fn new_from_env() -> Result<Self> {
        let endpoint =
            env::var(LLM_ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_LLM_ENDPOINT.to_string());
        let api_key = env::var(LLM_API_KEY_ENV).ok();
        Self::new(endpoint, api_key)
    }

    async fn post_chat(&self, payload: &Value) -> Result<ChatResponse> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("chat request failed")?;
        let response = response
            .error_for_status()
            .context("chat request bad status")?;
        response.json().await.context("chat response invalid json")
    }

    fn base_payload(request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if request.json_response {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }
}

#[async_trait]
impl ChatCompleter for HttpChatClient {
    async fn complete(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<String> {
        let payload = Self::base_payload(&request);
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Superseded.into()),
            response = self.post_chat(&payload) => response?,
        };
        first_message(response)?
            .content
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow::anyhow!("chat response carried no content"))
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut payload = Self::base_payload(&request);
        payload["stream"] = json!(true);
        let mut http = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Superseded.into()),
            response = http.send() => response.context("chat stream request failed")?,
        };
        let response = response
            .error_for_status()
            .context("chat stream bad status")?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Err(Superseded.into()),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let bytes = chunk.context("chat stream chunk failed")?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                match parse_stream_line(&line) {
                    StreamLine::Delta(text) => {
                        if sink.send(text).await.is_err() {
                            return Ok(());
                        }
                    }
                    StreamLine::Done => return Ok(()),
                    StreamLine::Skip => {}
                }
            }
        }
        Ok(())
    }

    async fn run_tools(
        &self,
        request: ChatRequest,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
        let tool_table: Vec<Value> = tools
            .specs()
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect();
        for _ in 0..MAX_TOOL_ROUNDS {
            let mut payload = json!({
                "model": request.model,
                "messages": messages,
                "tools": tool_table,
            });
            if let Some(max_tokens) = request.max_tokens {
                payload["max_tokens"] = json!(max_tokens);
            }
            let response = tokio::select! {
                () = cancel.cancelled() => return Err(Superseded.into()),
                response = self.post_chat(&payload) => response?,
            };
            let message = first_message(response)?;
            let calls = message.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                return Ok(message.content.unwrap_or_default());
            }
            messages.push(json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.function.name,
                        "arguments": call.function.arguments,
                    }
                })).collect::<Vec<_>>(),
            }));
            for call in calls {
                // The mutation itself is synchronous; the check here is the
                // last gate before it touches shared state.
                if cancel.is_cancelled() {
                    return Err(Superseded.into());
                }
                let result = tools.dispatch(&call.function.name, &call.function.arguments);
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result,
                }));
            }
        }
        bail!("tool loop did not settle within {MAX_TOOL_ROUNDS} rounds")
    }
}

/// Image collaborator speaking an OpenAI-style image-generations protocol.
pub struct HttpImageClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpImageClient {
    /// Creates a client for an explicit endpoint.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("worldbox/alpha")
            .build()
            .context("building http image client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Creates a client from the environment, with local defaults.
    pub fn new_from_env() -> Result<Self> {
        let endpoint =
            env::var(IMAGE_ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_IMAGE_ENDPOINT.to_string());
        let api_key = env::var(IMAGE_API_KEY_ENV).ok();
        Self::new(endpoint, api_key)
    }
}

#[async_trait]
impl ImagePainter for HttpImageClient {
    async fn render(
        &self,
        prompt: &str,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let payload = json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "response_format": "url",
        });
        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Superseded.into()),
            response = request.send() => response.context("image request failed")?,
        };
        let body: ImageResponse = response
            .error_for_status()
            .context("image request bad status")?
            .json()
            .await
            .context("image response invalid json")?;
        body.data
            .into_iter()
            .next()
            .map(|entry| entry.url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow::anyhow!("image response carried no url"))
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    message.image.as_ref().map_or_else(
        || json!({ "role": role, "content": message.content }),
        |image| {
            json!({
                "role": role,
                "content": [
                    { "type": "text", "text": message.content },
                    { "type": "image_url", "image_url": { "url": image } },
                ]
            })
        },
    )
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    url: String,
}

fn first_message(response: ChatResponse) -> Result<ResponseMessage> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| anyhow::anyhow!("chat response carried no choices"))
}

enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|value| {
            value["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .map_or(StreamLine::Skip, StreamLine::Delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_lines_parse_deltas_and_done() {
        let delta = parse_stream_line(
            r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#,
        );
        assert!(matches!(delta, StreamLine::Delta(text) if text == "hi"));
        assert!(matches!(parse_stream_line("data: [DONE]"), StreamLine::Done));
        assert!(matches!(parse_stream_line(""), StreamLine::Skip));
        assert!(matches!(
            parse_stream_line(r#"data: {"choices":[{"delta":{}}]}"#),
            StreamLine::Skip
        ));
    }

    #[test]
    fn image_messages_split_into_content_parts() {
        let wired = wire_message(&ChatMessage::user_with_image("look", "data:image/jpeg;..."));
        assert_eq!(wired["role"], "user");
        assert_eq!(wired["content"][0]["text"], "look");
        assert_eq!(wired["content"][1]["image_url"]["url"], "data:image/jpeg;...");
    }

    #[test]
    fn plain_messages_stay_flat() {
        let wired = wire_message(&ChatMessage::system("be brief"));
        assert_eq!(wired["content"], "be brief");
    }
}
