//! Tool System
//!
//! The tool process is reached through a [`ToolChannel`]: it advertises its
//! catalog once at connect time and executes named tools on demand.
//! [`ToolInvoker`] turns a model's `tool_use` block into the matching
//! `tool_result` block.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{EvalError, Result};
use crate::message::ContentBlock;

/// Tool definition advertised by the tool process and forwarded to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments
    #[serde(alias = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Result of one tool call as reported by the tool process
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    /// The tool ran but reported failure
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    pub const fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub const fn error(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: true,
        }
    }
}

/// Channel to an external tool process
#[async_trait]
pub trait ToolChannel: Send + Sync {
    /// Catalog captured at connect time
    fn tools(&self) -> &[ToolDescriptor];

    /// Version string reported by the tool process during the handshake
    fn server_version(&self) -> &str;

    /// Execute a tool. Only one call may be outstanding at a time.
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutput>;

    /// Shut the channel down. Calling it more than once is a no-op.
    async fn close(&self) -> Result<()>;
}

/// What to do when a tool invocation fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailurePolicy {
    /// Abort the conversation with the error
    #[default]
    FailFast,

    /// Send the error text back to the model as an error tool result
    ReportToModel,
}

impl std::str::FromStr for ToolFailurePolicy {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail" | "fail_fast" => Ok(Self::FailFast),
            "report" | "report_to_model" => Ok(Self::ReportToModel),
            other => Err(EvalError::Config(format!("Unknown tool failure policy: {other}"))),
        }
    }
}

/// Invokes tools over a channel on behalf of the model
#[derive(Clone)]
pub struct ToolInvoker {
    channel: Arc<dyn ToolChannel>,
}

impl ToolInvoker {
    pub fn new(channel: Arc<dyn ToolChannel>) -> Self {
        Self { channel }
    }

    /// Tool catalog, forwarded unchanged to every model call
    pub fn tools(&self) -> &[ToolDescriptor] {
        self.channel.tools()
    }

    /// Invoke the tool named by a `tool_use` block.
    ///
    /// Returns a `tool_result` block whose `tool_use_id` equals the request id.
    /// Under [`ToolFailurePolicy::ReportToModel`] a failed call becomes an
    /// error result; a lost channel is always returned as an error.
    pub async fn invoke(&self, tool_use: &ContentBlock, policy: ToolFailurePolicy) -> Result<ContentBlock> {
        let ContentBlock::ToolUse { id, name, input } = tool_use else {
            return Err(EvalError::ToolInvocation(format!(
                "Expected a tool_use block, got {}",
                tool_use.type_name()
            )));
        };

        tracing::info!(tool = %name, tool_use_id = %id, "Invoking tool");
        tracing::debug!(tool = %name, arguments = %input, "Tool arguments");

        match self.channel.invoke(name, input.clone()).await {
            Ok(output) => {
                if output.is_error {
                    tracing::warn!(tool = %name, "Tool reported an error");
                }
                tracing::debug!(tool = %name, blocks = output.content.len(), "Tool returned");
                Ok(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content: output.content,
                    is_error: output.is_error,
                })
            }
            Err(err @ EvalError::ToolInvocation(_)) if policy == ToolFailurePolicy::ReportToModel => {
                tracing::warn!(tool = %name, error = %err, "Tool failed, reporting to model");
                Ok(ContentBlock::tool_error(id.clone(), err.to_string()))
            }
            Err(err) => {
                tracing::error!(tool = %name, error = %err, "Tool failed");
                Err(err)
            }
        }
    }
}
