//! Typed error hierarchy for the pipeline orchestrator.
//!
//! Each subsystem gets its own `thiserror` enum; `PipelineError` composes them
//! via `#[from]` so handlers can use `?` internally while the driver still
//! converts every `Err` into a `fail` transition rather than letting it
//! unwind past the dispatch loop.

use thiserror::Error;

/// Errors from collaborator clients (architect, contract engine, codebase
/// intel, graph RAG) after retry and fallback have both been exhausted.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("failed to spawn collaborator process '{tool}': {source}")]
    SpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("collaborator '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("collaborator '{tool}' returned a structured error: {message}")]
    ToolError { tool: String, message: String },

    #[error("malformed response from collaborator '{tool}': {reason}")]
    MalformedResponse { tool: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the contract-registration + builder fan-out scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to materialize builder input directory for service '{service}': {source}")]
    MaterializationFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn builder for service '{service}': {source}")]
    SpawnFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("builder for service '{service}' timed out after {seconds}s")]
    BuilderTimeout { service: String, seconds: u64 },

    #[error("no builder for any service produced a result")]
    NoBuildersSucceeded,
}

/// Errors from the quality gate engine.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("layer {layer} scanner failed: {message}")]
    ScannerFailed { layer: u8, message: String },

    #[error("blocking violations remain and no fix attempts are left")]
    BlockingViolationsExhausted,
}

/// Errors from the fix-pass convergence engine.
#[derive(Debug, Error)]
pub enum FixPassError {
    #[error("fix pass {pass} exceeded max_fix_passes ({max})")]
    BudgetExceeded { pass: u32, max: u32 },

    #[error("failed to write FIX_INSTRUCTIONS.md for service '{service}': {source}")]
    InstructionsWriteFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Errors from configuration loading and the persisted state document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config at {path}: {source}")]
    MalformedConfig {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing PRD file at {path}")]
    MissingPrd { path: std::path::PathBuf },

    #[error(
        "persisted state has schema version {found} but this binary only supports up to {supported}; refusing to resume"
    )]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Top-level error type threaded through the driver loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    FixPass(#[from] FixPassError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("budget exceeded: total cost {total} exceeds ceiling {ceiling}")]
    BudgetExceeded { total: f64, ceiling: f64 },

    #[error("interrupted: {reason}")]
    Interrupted { reason: String },

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_error_timeout_is_matchable() {
        let err = CollaboratorError::Timeout {
            tool: "architect".into(),
            seconds: 900,
        };
        match &err {
            CollaboratorError::Timeout { tool, seconds } => {
                assert_eq!(tool, "architect");
                assert_eq!(*seconds, 900);
            }
            _ => panic!("expected Timeout"),
        }
        assert!(err.to_string().contains("900"));
    }

    #[test]
    fn scheduler_error_no_builders_succeeded_is_unit_like() {
        let err = SchedulerError::NoBuildersSucceeded;
        assert!(matches!(err, SchedulerError::NoBuildersSucceeded));
    }

    #[test]
    fn fix_pass_error_converts_from_scheduler_error() {
        let inner = SchedulerError::BuilderTimeout {
            service: "user-service".into(),
            seconds: 1800,
        };
        let fp_err: FixPassError = inner.into();
        match &fp_err {
            FixPassError::Scheduler(SchedulerError::BuilderTimeout { service, .. }) => {
                assert_eq!(service, "user-service");
            }
            _ => panic!("expected FixPassError::Scheduler(BuilderTimeout)"),
        }
    }

    #[test]
    fn pipeline_error_budget_exceeded_carries_values() {
        let err = PipelineError::BudgetExceeded {
            total: 10.5,
            ceiling: 10.0,
        };
        assert!(err.to_string().contains("10.5"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn pipeline_error_wraps_every_subsystem_error() {
        fn assert_from<E>(_: E)
        where
            PipelineError: From<E>,
        {
        }
        assert_from(CollaboratorError::ToolError {
            tool: "x".into(),
            message: "y".into(),
        });
        assert_from(SchedulerError::NoBuildersSucceeded);
        assert_from(GateError::BlockingViolationsExhausted);
        assert_from(FixPassError::BudgetExceeded { pass: 5, max: 5 });
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CollaboratorError::ToolError {
            tool: "x".into(),
            message: "y".into(),
        });
        assert_std_error(&SchedulerError::NoBuildersSucceeded);
        assert_std_error(&GateError::BlockingViolationsExhausted);
        assert_std_error(&FixPassError::BudgetExceeded { pass: 1, max: 5 });
        assert_std_error(&PipelineError::Invariant("x".into()));
    }
}
</content>
