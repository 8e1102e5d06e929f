//! Knowledge-graph RAG collaborator: answers "which other services care
//! about this contract" style queries for builder context injection. Falls
//! back to `None`, meaning the context block resolved from
//! `--context-file` (see [`crate::scheduler::context`]) is used as-is.

use serde_json::json;

use crate::collaborators::mcp::McpClient;
use crate::collaborators::retry::with_retry;

pub struct GraphRag {
    client: McpClient,
}

impl GraphRag {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            client: McpClient::new("graph.neighbors", command),
        }
    }

    pub async fn neighbors(&self, service: &str) -> Option<Vec<String>> {
        with_retry("graph_rag", || {
            self.client
                .call::<Vec<String>>(json!({ "service": service }))
        })
        .await
        .ok()
    }
}

</content>
