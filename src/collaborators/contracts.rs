//! Contract engine collaborator: registers a service's API/event contracts.
//! Falls back to writing the contract directly into the registry directory
//! as a JSON file when the collaborator is unavailable.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Value, json};

use crate::collaborators::mcp::McpClient;
use crate::collaborators::retry::with_retry;
use crate::error::ConfigError;
use crate::models::ServiceInfo;
use crate::store;

pub struct ContractEngine {
    client: McpClient,
    registry_dir: std::path::PathBuf,
}

impl ContractEngine {
    pub fn new(command: impl Into<String>, registry_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            client: McpClient::new("contracts.register", command),
            registry_dir: registry_dir.into(),
        }
    }

    /// Register `contract` for `service` of the given `contract_type`
    /// ("api" | "event"). Returns true if the collaborator handled it,
    /// false if the filesystem fallback was used.
    pub async fn register(
        &self,
        service: &str,
        contract_type: &str,
        contract: &Value,
    ) -> Result<bool, ConfigError> {
        let result = with_retry("contracts", || {
            self.client.call::<Value>(json!({
                "service": service,
                "type": contract_type,
                "contract": contract,
            }))
        })
        .await;

        if result.is_ok() {
            return Ok(true);
        }

        let path = self.fallback_path(service, contract_type);
        store::write_atomic(&path, contract)?;
        Ok(false)
    }

    pub fn fallback_path(&self, service: &str, contract_type: &str) -> std::path::PathBuf {
        Path::new(&self.registry_dir).join(format!("{service}-{contract_type}.json"))
    }

    /// Read every service's registered "api" contract back off disk. Used by
    /// the scheduler when it materializes builder input, which may happen in
    /// a later process invocation (after `resume`) than the one that
    /// registered the contracts in the first place — so the provided/consumed
    /// contract set is always rebuilt from the registry rather than carried
    /// in memory across phases.
    pub fn load_registered(&self, services: &[ServiceInfo]) -> HashMap<String, Value> {
        let mut loaded = HashMap::with_capacity(services.len());
        for service in services {
            let path = self.fallback_path(&service.name, "api");
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(contract) = serde_json::from_str(&contents) {
                    loaded.insert(service.name.clone(), contract);
                }
            }
        }
        loaded
    }
}

</content>
