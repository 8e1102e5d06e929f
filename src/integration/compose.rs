//! Compose description generation: one service file plus a root manifest
//! listing them, written under `<output_dir>/integration/`.

use std::path::{Path, PathBuf};

use crate::error::SchedulerError;
use crate::models::ServiceInfo;

pub fn write_compose_file(
    output_dir: &Path,
    services: &[ServiceInfo],
) -> Result<PathBuf, SchedulerError> {
    let dir = output_dir.join("integration");
    std::fs::create_dir_all(&dir).map_err(|source| SchedulerError::MaterializationFailed {
        service: "integration".to_string(),
        source,
    })?;

    let mut manifest = String::from("version: \"3.9\"\nservices:\n");
    for service in services {
        manifest.push_str(&format!("  {}:\n", service.name));
        manifest.push_str(&format!("    build: ../builders/{}\n", service.name));
        if !service.depends_on.is_empty() {
            manifest.push_str("    depends_on:\n");
            for dep in &service.depends_on {
                manifest.push_str(&format!("      - {dep}\n"));
            }
        }
        manifest.push_str("    healthcheck:\n");
        manifest.push_str("      test: [\"CMD\", \"true\"]\n");
        manifest.push_str("      interval: 5s\n");
        manifest.push_str("      retries: 3\n");
    }

    let path = dir.join("docker-compose.yml");
    std::fs::write(&path, manifest).map_err(|source| SchedulerError::MaterializationFailed {
        service: "integration".to_string(),
        source,
    })?;
    Ok(path)
}

</content>
