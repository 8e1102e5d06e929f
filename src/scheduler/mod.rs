//! Contract registration and bounded-concurrency builder fan-out.
//!
//! Grounded directly on `dag/executor.rs`'s `Arc<Mutex<_>>` +
//! `Arc<Semaphore>` + `mpsc` + `tokio::spawn` bounded-concurrency pattern.

pub mod builder;
pub mod context;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::info;

use crate::collaborators::contracts::ContractEngine;
use crate::error::SchedulerError;
use crate::models::{BuilderResult, ServiceInfo};

pub use builder::{BuilderConfig, run_builder};

/// Register every service's contract (one "api" contract per service, per
/// the spec's minimal contract surface), via the collaborator with a
/// filesystem fallback. Returns the provided contract body for each
/// service, keyed by service name, so the scheduler can hand every builder
/// its own provided contract plus the contracts it consumes from its
/// dependencies without re-reading the registry (and without caring
/// whether a given one went through the collaborator or the fallback).
pub async fn register_contracts(
    engine: &ContractEngine,
    services: &[ServiceInfo],
) -> Result<HashMap<String, Value>, SchedulerError> {
    let mut provided = HashMap::with_capacity(services.len());
    for service in services {
        let contract = json!({
            "service": service.name,
            "depends_on": service.depends_on,
            "owns_data": service.owns_data,
        });
        engine
            .register(&service.name, "api", &contract)
            .await
            .map_err(|e| SchedulerError::MaterializationFailed {
                service: service.name.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;
        provided.insert(service.name.clone(), contract);
    }
    Ok(provided)
}

/// Materialize the per-service builder input directory: `prd_input.md`, a
/// `contracts/` directory populated with this service's provided contract
/// plus every contract it consumes from its dependencies, `builder_config.json`
/// enumerating the service's full boundary (§4.6), and `context.md` when a
/// resolved context block is available.
pub fn materialize_builder_input(
    output_dir: &Path,
    service: &ServiceInfo,
    prd: &str,
    provided_contracts: &HashMap<String, Value>,
    graph_rag_context: Option<&str>,
) -> Result<PathBuf, SchedulerError> {
    let service_dir = output_dir.join("builders").join(&service.name);
    let contracts_dir = service_dir.join("contracts");
    std::fs::create_dir_all(&contracts_dir).map_err(|source| SchedulerError::MaterializationFailed {
        service: service.name.clone(),
        source,
    })?;

    std::fs::write(service_dir.join("prd_input.md"), prd).map_err(|source| {
        SchedulerError::MaterializationFailed {
            service: service.name.clone(),
            source,
        }
    })?;

    let own_contract = provided_contracts.get(&service.name).cloned();
    if let Some(contract) = &own_contract {
        write_contract_file(&contracts_dir, &service.name, "api", contract, &service.name)?;
    }

    let mut consumed = Vec::with_capacity(service.depends_on.len());
    for dependency in &service.depends_on {
        if let Some(contract) = provided_contracts.get(dependency) {
            write_contract_file(&contracts_dir, dependency, "api", contract, &service.name)?;
            consumed.push(json!({ "service": dependency, "type": "api", "contract": contract }));
        } else {
            // Dependency hasn't registered yet (out-of-order decomposition,
            // or a dependency name the architect invented with no matching
            // service) — the builder gets no consumed spec for it rather
            // than a materialization failure.
            consumed.push(json!({ "service": dependency, "type": "api", "contract": Value::Null }));
        }
    }

    let config = json!({
        "service": service.name,
        "domain": service.description,
        "depends_on": service.depends_on,
        "entities": service.owns_data,
        "state_machines": Vec::<Value>::new(),
        "stack": {
            "language": service.stack.language,
            "framework": service.stack.framework,
            "database": service.stack.database,
        },
        "port": service.port,
        "health_endpoint": service.health_endpoint,
        "output_dir": service_dir,
        "provided_contracts": own_contract.map(|c| vec![json!({"type": "api", "contract": c})]).unwrap_or_default(),
        "consumed_contracts": consumed,
        "graph_rag_context": graph_rag_context.unwrap_or_default(),
    });
    std::fs::write(
        service_dir.join("builder_config.json"),
        serde_json::to_vec_pretty(&config).expect("config serializes"),
    )
    .map_err(|source| SchedulerError::MaterializationFailed {
        service: service.name.clone(),
        source,
    })?;

    if let Some(context) = graph_rag_context {
        std::fs::write(service_dir.join("context.md"), context).map_err(|source| {
            SchedulerError::MaterializationFailed {
                service: service.name.clone(),
                source,
            }
        })?;
    }

    Ok(service_dir)
}

/// Write one contract spec into a builder's `contracts/` directory, named
/// `<service>_<type>.json` so a consumed contract from another service
/// can't collide with the builder's own provided contract.
fn write_contract_file(
    contracts_dir: &Path,
    contract_owner: &str,
    contract_type: &str,
    contract: &Value,
    requesting_service: &str,
) -> Result<(), SchedulerError> {
    let path = contracts_dir.join(format!("{contract_owner}_{contract_type}.json"));
    std::fs::write(&path, serde_json::to_vec_pretty(contract).expect("contract serializes")).map_err(|source| {
        SchedulerError::MaterializationFailed {
            service: requesting_service.to_string(),
            source,
        }
    })
}

/// Run every service's builder concurrently, bounded by `max_concurrent`.
/// Collects every result before returning, including failures — a single
/// failed builder never aborts the others.
pub async fn run_builders(
    services: Vec<ServiceInfo>,
    service_dirs: Vec<PathBuf>,
    config: BuilderConfig,
    max_concurrent: usize,
) -> Result<Vec<BuilderResult>, SchedulerError> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let (tx, mut rx) = mpsc::channel::<BuilderResult>(services.len().max(1));
    let results = Arc::new(Mutex::new(Vec::with_capacity(services.len())));

    for (service, dir) in services.into_iter().zip(service_dirs.into_iter()) {
        let semaphore = semaphore.clone();
        let tx = tx.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");
            info!(service = %service.name, "builder starting");
            let result = run_builder(&service, &dir, &config).await;
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    while let Some(result) = rx.recv().await {
        results.lock().await.push(result);
    }

    let mut results = Arc::try_unwrap(results)
        .expect("all senders dropped")
        .into_inner();

    // Completion order is whatever order builders happen to finish in;
    // everything downstream (gate reports, persisted state) reduces
    // deterministically by service id instead.
    results.sort_by(|a, b| a.service.cmp(&b.service));
    Ok(results)
}

</content>
