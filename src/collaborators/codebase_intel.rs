//! Codebase intelligence collaborator: maps a service's existing code for
//! builder context. Falls back to an empty mapping (builders then work from
//! the PRD and contracts alone).

use serde_json::json;

use crate::collaborators::mcp::McpClient;
use crate::collaborators::retry::with_retry;

pub struct CodebaseIntel {
    client: McpClient,
}

impl CodebaseIntel {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            client: McpClient::new("codebase.map", command),
        }
    }

    pub async fn map_service(&self, service: &str, root: &str) -> Vec<String> {
        let result = with_retry("codebase_intel", || {
            self.client
                .call::<Vec<String>>(json!({ "service": service, "root": root }))
        })
        .await;
        result.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_service_falls_back_to_empty_list() {
        let intel = CodebaseIntel::new("definitely-not-a-real-binary-xyz");
        let files = intel.map_service("users", ".").await;
        assert!(files.is_empty());
    }
}
</content>
