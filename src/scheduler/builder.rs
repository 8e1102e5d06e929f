//! Single-builder lifecycle: spawn, race against a timeout, and on timeout
//! or shutdown give the child a grace window to exit before force-killing
//! it.
//!
//! Grounded on `swarm/executor.rs`'s `tokio::select!` timeout race, extended
//! here with a graceful-then-forceful kill (the teacher force-kills
//! immediately on timeout; builders here may be mid-write to disk so they
//! get `TERMINATION_GRACE` to flush before SIGKILL).

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::models::{BuilderResult, ServiceInfo};

/// Grace window between asking a builder to stop and force-killing it.
/// Picked to be long enough for a builder to flush a partially-written file
/// but short enough not to stall the pipeline noticeably.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(10);

/// Environment variables every collaborator child process inherits,
/// regardless of what the parent's own environment carries.
const INHERITED_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG"];

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub depth: String,
}

/// The builder's own self-report, written as `STATE.json` in its output
/// directory. A missing or malformed file is not treated as the builder
/// lying about its exit code — it's treated as the builder not having
/// finished cleanly at all, so `run_builder` downgrades the result to a
/// failure regardless of the process exit status.
#[derive(Debug, Deserialize)]
struct BuilderState {
    success: bool,
    #[serde(default)]
    tests_passed: u32,
    #[serde(default)]
    tests_total: u32,
    #[serde(default)]
    artifacts: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

fn child_env() -> Vec<(String, String)> {
    INHERITED_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| ((*name).to_string(), v)))
        .collect()
}

/// Run one builder subprocess for `service` inside `service_dir`, returning
/// a [`BuilderResult`] even on failure or timeout — builders never abort the
/// overall fan-out. Success is read from the builder's `STATE.json`
/// self-report, not from the process exit code alone: a builder can exit
/// zero but still have failed to converge its own test suite.
pub async fn run_builder(
    service: &ServiceInfo,
    service_dir: &Path,
    config: &BuilderConfig,
) -> BuilderResult {
    let start = Instant::now();
    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .arg("--depth")
        .arg(&config.depth);

    // The resolved context block is already materialized at
    // `service_dir/context.md` (§4.7); pass its path explicitly rather than
    // relying on the builder to discover it in its own working directory.
    let context_file = service_dir.join("context.md");
    if context_file.is_file() {
        command.arg("--context-file").arg(&context_file);
    }

    let spawned = command
        .current_dir(service_dir)
        .env_clear()
        .envs(child_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            return BuilderResult {
                service: service.name.clone(),
                success: false,
                cost: 0.0,
                duration_seconds: start.elapsed().as_secs_f64(),
                fallback: false,
                error: Some(err.to_string()),
                output_dir: service_dir.to_path_buf(),
                tests_passed: 0,
                tests_total: 0,
                artifacts: Vec::new(),
            };
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let drain = async {
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut out_buf).await;
        }
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut err_buf).await;
        }
    };

    let exited = tokio::select! {
        status = child.wait() => {
            drain.await;
            status.is_ok()
        }
        _ = tokio::time::sleep(config.timeout) => {
            terminate_gracefully(&mut child).await;
            false
        }
    };

    let duration_seconds = start.elapsed().as_secs_f64();
    let state = read_builder_state(service_dir).await;

    match state {
        Some(state) => BuilderResult {
            service: service.name.clone(),
            success: exited && state.success,
            cost: 0.0,
            duration_seconds,
            fallback: false,
            error: state.error,
            output_dir: service_dir.to_path_buf(),
            tests_passed: state.tests_passed,
            tests_total: state.tests_total,
            artifacts: state.artifacts,
        },
        None => BuilderResult {
            service: service.name.clone(),
            success: false,
            cost: 0.0,
            duration_seconds,
            fallback: false,
            error: Some(if exited {
                "builder exited without a STATE.json report".to_string()
            } else {
                "builder timed out".to_string()
            }),
            output_dir: service_dir.to_path_buf(),
            tests_passed: 0,
            tests_total: 0,
            artifacts: Vec::new(),
        },
    }
}

async fn read_builder_state(service_dir: &Path) -> Option<BuilderState> {
    let path = service_dir.join("STATE.json");
    let contents = tokio::fs::read_to_string(&path).await.ok()?;
    serde_json::from_str(&contents).ok()
}

/// Ask the child to stop, wait [`TERMINATION_GRACE`], then force-kill if it
/// hasn't exited.
#[cfg(unix)]
async fn terminate_gracefully(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(TERMINATION_GRACE) => {
            let _ = child.kill().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut tokio::process::Child) {
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(TERMINATION_GRACE) => {
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service() -> ServiceInfo {
        ServiceInfo {
            name: "users".into(),
            description: "".into(),
            depends_on: vec![],
            owns_data: vec![],
            stack: Default::default(),
            port: 8080,
            health_endpoint: "/health".into(),
            events: None,
        }
    }

    fn write_state(dir: &Path, success: bool, passed: u32, total: u32) {
        std::fs::write(
            dir.join("STATE.json"),
            format!(r#"{{"success":{success},"tests_passed":{passed},"tests_total":{total}}}"#),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn run_builder_reads_success_from_state_json() {
        let dir = tempdir().unwrap();
        write_state(dir.path(), true, 10, 10);
        let config = BuilderConfig {
            command: "true".to_string(),
            args: vec![],
            timeout: Duration::from_secs(5),
            depth: "standard".to_string(),
        };
        let result = run_builder(&service(), dir.path(), &config).await;
        assert!(result.success);
        assert_eq!(result.tests_passed, 10);
        assert_eq!(result.tests_total, 10);
    }

    #[tokio::test]
    async fn run_builder_fails_when_state_json_reports_failure_despite_exit_zero() {
        let dir = tempdir().unwrap();
        write_state(dir.path(), false, 2, 10);
        let config = BuilderConfig {
            command: "true".to_string(),
            args: vec![],
            timeout: Duration::from_secs(5),
            depth: "standard".to_string(),
        };
        let result = run_builder(&service(), dir.path(), &config).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn run_builder_fails_when_state_json_is_missing() {
        let dir = tempdir().unwrap();
        let config = BuilderConfig {
            command: "true".to_string(),
            args: vec![],
            timeout: Duration::from_secs(5),
            depth: "standard".to_string(),
        };
        let result = run_builder(&service(), dir.path(), &config).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn run_builder_reports_spawn_failure_for_missing_binary() {
        let dir = tempdir().unwrap();
        let config = BuilderConfig {
            command: "definitely-not-a-real-binary-xyz".to_string(),
            args: vec![],
            timeout: Duration::from_secs(5),
            depth: "standard".to_string(),
        };
        let result = run_builder(&service(), dir.path(), &config).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
</content>
