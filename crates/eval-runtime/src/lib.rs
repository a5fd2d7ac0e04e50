//! # eval-runtime
//!
//! Concrete collaborators for `eval-core`.
//!
//! ## Components
//!
//! - **Anthropic**: `ModelClient` over the Messages API (reqwest)
//! - **MCP stdio**: `ToolChannel` to a tool server spawned as a child process
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eval_runtime::{AnthropicClient, AnthropicConfig, StdioServerConfig, StdioTransport};
//!
//! let client = AnthropicClient::new(AnthropicConfig::new(api_key))?;
//! let transport = StdioTransport::connect(&StdioServerConfig::new("./server")).await?;
//! let session = EvalSession::new(
//!     Arc::new(transport),
//!     ModelGateway::with_defaults(Arc::new(client)),
//!     OrchestratorConfig::default(),
//! );
//! ```

pub mod anthropic;
pub mod mcp;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use mcp::{StdioServerConfig, StdioTransport};

// Re-export core types for convenience
pub use eval_core::{EvalError, EvalSession, ModelGateway, OrchestratorConfig, Prompt, Result, RunArtifact};
