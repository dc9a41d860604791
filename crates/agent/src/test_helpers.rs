//! Scripted collaborators for orchestrator tests.
//!
//! The providers stream each reply word by word so token events can be
//! checked against the final message.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use cadence_config::AppConfig;
use cadence_core::error::{ProviderError, ToolError};
use cadence_core::external::{ExternalToolInfo, ExternalToolServer};
use cadence_core::message::{Message, Role};
use cadence_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use cadence_core::validation::ValidationMode;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A config with validation off.
pub fn auto_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.validation.mode = ValidationMode::Auto;
    config
}

/// A reply containing a single tool call block.
pub fn tool_call(name: &str, arguments: serde_json::Value) -> String {
    let call = serde_json::json!({ "name": name, "arguments": arguments });
    format!("<tool_call>{call}</tool_call>")
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

async fn stream_words(response: ProviderResponse) -> ChunkReceiver {
    let content = response.message.content;
    let words: Vec<String> = content.split_inclusive(' ').map(str::to_string).collect();
    let (tx, rx) = tokio::sync::mpsc::channel(words.len() + 1);
    for word in words {
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(word),
                done: false,
                usage: None,
            }))
            .await;
    }
    let _ = tx
        .send(Ok(StreamChunk {
            content: None,
            done: true,
            usage: response.usage,
        }))
        .await;
    rx
}

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call returns the next response in the queue; once the queue is
/// exhausted every call fails.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One text response per entry.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| make_text_response(t)).collect())
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.call_count)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        lock(&self.requests).push(request);
        let mut count = lock(&self.call_count);
        let responses = lock(&self.responses);

        if *count >= responses.len() {
            return Err(ProviderError::Unreachable(format!(
                "no more scripted responses (call #{}, have {})",
                *count,
                responses.len()
            )));
        }

        let response = responses[*count].clone();
        *count += 1;
        Ok(response)
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        Ok(stream_words(response).await)
    }
}

type Script = dyn Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync;

/// A provider whose reply is computed from the request.
///
/// Useful when several workflows call the model concurrently and a fixed
/// sequence would be order dependent.
pub struct ScriptedProvider {
    script: Box<Script>,
    call_count: Mutex<usize>,
    delays: Vec<(String, Duration)>,
}

impl ScriptedProvider {
    pub fn new(script: impl Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            call_count: Mutex::new(0),
            delays: Vec::new(),
        }
    }

    /// Sleep before answering workflows started with `task`.
    pub fn with_delay_for(mut self, task: &str, delay: Duration) -> Self {
        self.delays.push((task.to_string(), delay));
        self
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.call_count)
    }

    /// The message that started the workflow making this request.
    pub fn first_user_message(request: &ProviderRequest) -> &str {
        request
            .messages
            .iter()
            .find(|m| m.role == Role::User && !m.is_observation())
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn has_observation(request: &ProviderRequest) -> bool {
        request.messages.iter().any(|m| m.is_observation())
    }

    /// The most recent tool observation, if any.
    pub fn last_observation(request: &ProviderRequest) -> Option<&str> {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_observation())
            .map(|m| m.content.as_str())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *lock(&self.call_count) += 1;
        let task = Self::first_user_message(&request);
        if let Some((_, delay)) = self.delays.iter().find(|(t, _)| t == task) {
            tokio::time::sleep(*delay).await;
        }
        let text = (self.script)(&request)?;
        Ok(make_text_response(&text))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        Ok(stream_words(response).await)
    }
}

/// An external tool server that echoes its input after an optional delay.
#[derive(Default)]
pub struct EchoToolServer {
    tools: Vec<ExternalToolInfo>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
}

impl EchoToolServer {
    pub fn new(server: &str, tools: &[&str]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|name| ExternalToolInfo {
                    server: server.into(),
                    name: (*name).into(),
                    description: format!("Echo tool {name}"),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ExternalToolServer for EchoToolServer {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        lock(&self.calls).push((server.into(), tool.into(), arguments.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.tools.iter().any(|t| t.server == server && t.name == tool) {
            return Err(ToolError::NotFound(format!("{server}:{tool}")));
        }
        Ok(serde_json::json!({ "tool": tool, "echo": arguments }))
    }

    async fn list_tools(&self) -> Result<Vec<ExternalToolInfo>, ToolError> {
        Ok(self.tools.clone())
    }
}
