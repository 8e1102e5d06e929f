//! Architect collaborator: turns a PRD into a service map. Falls back to a
//! single-service decomposition (the whole PRD as one service) if the
//! collaborator is unreachable, tagged so downstream code can tell.

use serde_json::json;

use crate::collaborators::mcp::McpClient;
use crate::collaborators::retry::with_retry;
use crate::models::ServiceInfo;

pub struct Architect {
    client: McpClient,
}

impl Architect {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            client: McpClient::new("architect.decompose", command),
        }
    }

    /// Decompose `prd` into services, degrading to a single fallback
    /// service (`fallback: true` equivalent — callers can tell from the
    /// single-entry, dependency-free shape) rather than erroring.
    pub async fn decompose(&self, prd: &str, prd_path: &str) -> Vec<ServiceInfo> {
        let result = with_retry("architect", || {
            self.client
                .call::<Vec<ServiceInfo>>(json!({ "prd": prd, "path": prd_path }))
        })
        .await;

        match result {
            Ok(services) if !services.is_empty() => services,
            _ => vec![fallback_service(prd_path)],
        }
    }
}

fn fallback_service(prd_path: &str) -> ServiceInfo {
    ServiceInfo {
        name: "monolith".to_string(),
        description: format!("single-service fallback decomposition of {prd_path}"),
        depends_on: Vec::new(),
        owns_data: Vec::new(),
        stack: Default::default(),
        port: 8080,
        health_endpoint: "/health".into(),
        events: None,
    }
}

</content>
