//! MCP-style collaborator clients: architect, contract engine, codebase
//! intel, and graph RAG. Each is a thin adapter over [`mcp::McpClient`],
//! wrapped by [`retry::with_retry`] and a fallback that degrades to a safe
//! default rather than raising once both the call and its retries fail.

pub mod architect;
pub mod codebase_intel;
pub mod contracts;
pub mod graph_rag;
pub mod mcp;
pub mod retry;

pub use mcp::{McpClient, McpError};
</content>
