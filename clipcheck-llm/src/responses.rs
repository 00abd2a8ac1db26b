//! Responses API calls
//!
//! One-shot and streamed text generation. The streamed variant forwards
//! reasoning summaries as they complete so callers can show them live.

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::LlmClient;
use crate::error::{ClientError, Result};

/// Request body for `POST /v1/responses`
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    stream: bool,
}

/// Reasoning effort and summary settings
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningOptions {
    pub effort: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ResponseRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input: input.into(),
            reasoning: None,
            text: None,
            temperature: None,
            tools: None,
            stream: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Ask for a JSON object as output
    pub fn json_output(mut self) -> Self {
        self.text = Some(serde_json::json!({ "format": { "type": "json_object" } }));
        self
    }

    /// Ask for JSON that follows `schema` exactly
    ///
    /// Every object in the schema is tightened: all of its properties become
    /// required and unknown properties are refused.
    pub fn json_schema_output(mut self, name: impl Into<String>, mut schema: Value) -> Self {
        tighten_schema(&mut schema);
        self.text = Some(serde_json::json!({
            "format": {
                "type": "json_schema",
                "name": name.into(),
                "schema": schema,
                "strict": true,
            }
        }));
        self
    }

    /// Enable reasoning with automatic summaries
    pub fn with_reasoning(mut self, effort: impl Into<String>) -> Self {
        self.reasoning = Some(ReasoningOptions {
            effort: effort.into(),
            summary: Some("auto".to_string()),
        });
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Enable the provider's hosted web search tool
    pub fn with_web_search(mut self) -> Self {
        self.tools = Some(vec![serde_json::json!({ "type": "web_search" })]);
        self
    }
}

/// Marks every property of every object schema as required and closes it
pub fn tighten_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            let keys: Option<Vec<Value>> = map
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().map(Value::String).collect());
            if let Some(keys) = keys {
                map.insert("required".to_string(), Value::Array(keys));
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for value in map.values_mut() {
                tighten_schema(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(tighten_schema),
        _ => {}
    }
}

/// Text output of a response plus the raw provider payload
#[derive(Debug, Clone)]
pub struct ResponseOutput {
    pub text: String,
    pub raw: Value,
}

impl LlmClient {
    /// Generate a response in one request
    pub async fn create_response(&self, request: &ResponseRequest) -> Result<ResponseOutput> {
        let mut body = request.clone();
        body.stream = false;

        let response = self
            .authorized(self.client.post(self.endpoint("responses")))?
            .json(&body)
            .send()
            .await?;

        let raw: Value = self.handle_response(response).await?;
        if let Some(message) = response_error(&raw) {
            return Err(ClientError::ResponseFailed(message));
        }

        let text = output_text(&raw);
        if text.trim().is_empty() {
            return Err(ClientError::EmptyOutput);
        }
        Ok(ResponseOutput { text, raw })
    }

    /// Generate a response over server-sent events
    ///
    /// Each completed reasoning summary is sent on `reasoning` before this
    /// call returns. A closed receiver is ignored.
    pub async fn stream_response(
        &self,
        request: &ResponseRequest,
        reasoning: mpsc::Sender<String>,
    ) -> Result<ResponseOutput> {
        let mut body = request.clone();
        body.stream = true;

        let response = self
            .authorized(self.client.post(self.endpoint("responses")))?
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();
        let mut text = String::new();
        let mut completed: Option<Value> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in parser.push(&chunk) {
                let Ok(event) = serde_json::from_str::<Value>(&data) else {
                    debug!("Skipping non-JSON stream event");
                    continue;
                };
                match event.get("type").and_then(Value::as_str).unwrap_or_default() {
                    "response.output_text.delta" => {
                        if let Some(delta) = event.get("delta").and_then(Value::as_str) {
                            text.push_str(delta);
                        }
                    }
                    "response.reasoning_summary_text.done" => {
                        if let Some(summary) = event.get("text").and_then(Value::as_str) {
                            let summary = summary.trim();
                            if !summary.is_empty() {
                                let _ = reasoning.send(summary.to_string()).await;
                            }
                        }
                    }
                    "response.completed" => {
                        completed = event.get("response").cloned();
                    }
                    "response.failed" | "error" => {
                        let message = response_error(event.get("response").unwrap_or(&event))
                            .or_else(|| {
                                event
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                            })
                            .unwrap_or_else(|| "unknown stream error".to_string());
                        return Err(ClientError::ResponseFailed(message));
                    }
                    _ => {}
                }
            }
        }

        let raw = completed.unwrap_or(Value::Null);
        if text.trim().is_empty() {
            text = output_text(&raw);
        }
        if text.trim().is_empty() {
            return Err(ClientError::EmptyOutput);
        }
        Ok(ResponseOutput { text, raw })
    }
}

/// Concatenates every `output_text` part of every message in a response
fn output_text(raw: &Value) -> String {
    if let Some(text) = raw.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }

    raw.get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

fn response_error(raw: &Value) -> Option<String> {
    raw.get("error")
        .filter(|e| !e.is_null())
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
}

/// Incremental server-sent-events decoder yielding `data:` payloads
///
/// Buffers raw bytes so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, sep_len)) = find_event_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + sep_len).collect();
            let block = String::from_utf8_lossy(&block[..end]);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if data.is_empty() {
                continue;
            }
            let data = data.join("\n");
            if data != "[DONE]" {
                events.push(data);
            }
        }
        events
    }
}

/// Position and length of the first blank-line separator
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
