//! Scripted collaborators for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{EvalError, Result};
use crate::provider::{ModelClient, ModelRequest, ModelResponse};
use crate::tool::{ToolChannel, ToolDescriptor, ToolOutput};

/// Model client that replays a fixed list of outcomes
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    history_lengths: Mutex<Vec<usize>>,
}

impl ScriptedModelClient {
    pub fn new(script: Vec<Result<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            history_lengths: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.history_lengths.lock().unwrap().len()
    }

    /// Number of messages sent on each call
    pub fn seen_history_lengths(&self) -> Vec<usize> {
        self.history_lengths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_message(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
        self.history_lengths.lock().unwrap().push(request.messages.len());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EvalError::Other("script exhausted".into())))
    }
}

/// Tool channel that replays a fixed list of outcomes and counts closes
pub struct ScriptedToolChannel {
    tools: Vec<ToolDescriptor>,
    script: Mutex<VecDeque<Result<ToolOutput>>>,
    invocations: Mutex<Vec<(String, Value)>>,
    closes: AtomicUsize,
}

impl ScriptedToolChannel {
    pub const VERSION: &'static str = "test-1.0";

    pub fn new(script: Vec<Result<ToolOutput>>) -> Self {
        Self {
            tools: vec![ToolDescriptor::new("users", "List users", json!({"type": "object"}))],
            script: Mutex::new(script.into()),
            invocations: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolChannel for ScriptedToolChannel {
    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    fn server_version(&self) -> &str {
        Self::VERSION
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        self.invocations.lock().unwrap().push((name.to_string(), arguments));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EvalError::ToolInvocation("script exhausted".into())))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
