//! # eval-core
//!
//! Conversation orchestration between a model endpoint and an external tool
//! process, independent of any concrete transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        EvalSession                            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ Orchestrator │───│ ModelGateway │───│ ModelClient      │  │
//! │  │   (loop)     │   │  (retries)   │   │ (Strategy)       │  │
//! │  │              │   └──────────────┘   └──────────────────┘  │
//! │  │              │   ┌──────────────┐   ┌──────────────────┐  │
//! │  │              │───│ ToolInvoker  │───│ ToolChannel      │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `ModelClient` and `ToolChannel` are the seams: the runtime crate provides
//! the HTTP model client and the stdio tool channel.

pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{EvalError, Result};
pub use message::{ContentBlock, Conversation, Message, MessageContent, Role};
pub use provider::{ModelClient, ModelConfig, ModelGateway, ModelRequest, ModelResponse, RetryPolicy, StopReason};
pub use reasoning::{Orchestrator, OrchestratorConfig};
pub use session::{EvalSession, Prompt, RunArtifact};
pub use tool::{ToolChannel, ToolDescriptor, ToolFailurePolicy, ToolInvoker, ToolOutput};
