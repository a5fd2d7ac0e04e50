//! MCP (Model Context Protocol) client over stdio

pub mod protocol;
pub mod stdio;

pub use protocol::{Implementation, RpcError};
pub use stdio::{StdioServerConfig, StdioTransport};
