//! Data model shared across the driver, scheduler, gate, and fix-pass engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phases of the pipeline state machine, in roughly the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    ArchitectRunning,
    ArchitectReview,
    ContractsRegistering,
    BuildersRunning,
    BuildersComplete,
    Integrating,
    QualityGate,
    FixPass,
    Complete,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::ArchitectRunning => "architect_running",
            Phase::ArchitectReview => "architect_review",
            Phase::ContractsRegistering => "contracts_registering",
            Phase::BuildersRunning => "builders_running",
            Phase::BuildersComplete => "builders_complete",
            Phase::Integrating => "integrating",
            Phase::QualityGate => "quality_gate",
            Phase::FixPass => "fix_pass",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Events that drive phase transitions. Matched against the guard table in
/// `state::advance`. Named after the spec's trigger vocabulary (§4.2) so the
/// guard table reads the same as the transition table it implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    ArchitectStarted,
    ArchitectDone,
    RetryArchitect,
    ApproveArchitect,
    ContractsRegistered,
    BuildersFinished,
    StartIntegration,
    IntegrationDone,
    GatePassed,
    GateFailed,
    SkipToComplete,
    FixDone,
    Abort,
}

/// An event a service publishes or subscribes to, when the architect's
/// decomposition extracted an AsyncAPI section. Never synthesized from
/// prose when absent (§9) — downstream code treats a `None` service list as
/// "no event section", not as "events exist but unknown".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    pub direction: EventDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDirection {
    Publishes,
    Subscribes,
}

/// A service's language/framework/datastore choice, as decided by the
/// architect decomposition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackDescriptor {
    pub language: String,
    pub framework: String,
    pub database: String,
}

/// Architect-produced service boundary, persisted in `service_map.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub owns_data: Vec<String>,
    #[serde(default)]
    pub stack: StackDescriptor,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,
    /// `None` when the architect's decomposition carried no AsyncAPI
    /// section at all; `Some(vec![])` when it carried one but this service
    /// owns no events.
    #[serde(default)]
    pub events: Option<Vec<EventSpec>>,
}

fn default_port() -> u16 {
    8080
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

/// Outcome of one builder run for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderResult {
    pub service: String,
    pub success: bool,
    pub cost: f64,
    pub duration_seconds: f64,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output_dir: std::path::PathBuf,
    #[serde(default)]
    pub tests_passed: u32,
    #[serde(default)]
    pub tests_total: u32,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl BuilderResult {
    /// Fraction of the builder's own test suite that passed, in `[0, 1]`.
    /// A builder that reported zero tests converges trivially on success.
    pub fn convergence_ratio(&self) -> f64 {
        if self.tests_total == 0 {
            if self.success { 1.0 } else { 0.0 }
        } else {
            self.tests_passed as f64 / self.tests_total as f64
        }
    }
}

/// A single scan finding, normalized across all four quality gate layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanViolation {
    pub code: String,
    pub category: String,
    pub severity: Severity,
    pub service: Option<String>,
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Blocking,
}

/// A contract-level violation (API mismatch between declared and implemented).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractViolation {
    pub service: String,
    pub contract: String,
    pub description: String,
    pub severity: Severity,
}

/// Verdict for a single gate layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Partial,
    Skipped,
    Failed,
}

/// Result of running one quality gate layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer: u8,
    pub verdict: Verdict,
    pub violations: Vec<ScanViolation>,
}

/// Aggregated result of the full quality gate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateReport {
    pub overall: Verdict,
    pub layers: Vec<LayerResult>,
    pub generated_at: DateTime<Utc>,
}

impl QualityGateReport {
    /// Worst verdict across layers 1-3. Layer 4 (adversarial) never affects
    /// promotion per the spec's always-PASSED forcing rule.
    pub fn worst_of_first_three(&self) -> Verdict {
        self.layers
            .iter()
            .filter(|l| l.layer <= 3)
            .map(|l| l.verdict)
            .max()
            .unwrap_or(Verdict::Passed)
    }
}

/// Result of one integration test category run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationTestResult {
    pub category: String,
    pub passed: u32,
    pub failed: u32,
    pub details: Vec<String>,
}

/// Aggregated result of the integration harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub brought_up: bool,
    pub tests: Vec<IntegrationTestResult>,
    #[serde(default)]
    pub violations: Vec<ContractViolation>,
    pub generated_at: DateTime<Utc>,
}

impl IntegrationReport {
    pub fn all_passed(&self) -> bool {
        self.brought_up && self.tests.iter().all(|t| t.failed == 0)
    }
}

/// Priority bucket assigned to a violation during CLASSIFY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPriority {
    P0,
    P1,
    P2,
    P3,
}

/// Outcome of a single fix-pass cycle (DISCOVER..REGRESS), appended to
/// `PipelineState.fix_pass_history`. Persisted rather than kept in memory
/// only, so resume sees prior convergence history (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPassResult {
    pub pass: u32,
    pub p0_count: u32,
    pub p1_count: u32,
    pub p2_count: u32,
    pub p3_count: u32,
    pub fixes_generated: u32,
    pub fixes_applied: u32,
    /// Violation count this pass started from (DISCOVER snapshot).
    pub before_count: usize,
    /// Violation count observed once the next quality-gate run verifies
    /// this pass's fixes (VERIFY snapshot); `None` until that gate runs.
    #[serde(default)]
    pub after_count: Option<usize>,
    pub effectiveness: f64,
    pub regression_rate: f64,
    pub weighted_score: f64,
    pub converged: bool,
}

/// Top-level persisted pipeline state, the single source of truth written to
/// `PIPELINE_STATE.json` by the atomic artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub schema_version: u32,
    pub run_id: uuid::Uuid,
    pub phase: Phase,
    #[serde(default)]
    pub previous_phase: Option<Phase>,
    #[serde(default)]
    pub completed_phases: Vec<Phase>,
    #[serde(default)]
    pub architect_retries: u32,
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub builder_results: HashMap<String, BuilderResult>,
    #[serde(default)]
    pub gate_reports: Vec<QualityGateReport>,
    #[serde(default)]
    pub integration_reports: Vec<IntegrationReport>,
    #[serde(default)]
    pub fix_pass_history: Vec<FixPassResult>,
    pub cost_total: f64,
    pub budget_limit: f64,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub interrupt_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current schema version this binary writes and the highest it will load.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

impl PipelineState {
    pub fn new(budget_limit: f64) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: uuid::Uuid::new_v4(),
            phase: Phase::Init,
            previous_phase: None,
            completed_phases: Vec::new(),
            architect_retries: 0,
            services: Vec::new(),
            builder_results: HashMap::new(),
            gate_reports: Vec::new(),
            integration_reports: Vec::new(),
            fix_pass_history: Vec::new(),
            interrupted: false,
            interrupt_reason: None,
            cost_total: 0.0,
            budget_limit,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display_matches_snake_case_serde_names() {
        assert_eq!(Phase::ArchitectRunning.to_string(), "architect_running");
        assert_eq!(Phase::QualityGate.to_string(), "quality_gate");
        assert_eq!(Phase::Complete.to_string(), "complete");
    }

    #[test]
    fn quality_gate_report_worst_of_first_three_ignores_layer_four() {
        let report = QualityGateReport {
            overall: Verdict::Passed,
            layers: vec![
                LayerResult {
                    layer: 1,
                    verdict: Verdict::Passed,
                    violations: vec![],
                },
                LayerResult {
                    layer: 3,
                    verdict: Verdict::Partial,
                    violations: vec![],
                },
                LayerResult {
                    layer: 4,
                    verdict: Verdict::Failed,
                    violations: vec![],
                },
            ],
            generated_at: Utc::now(),
        };
        assert_eq!(report.worst_of_first_three(), Verdict::Partial);
    }

    #[test]
    fn integration_report_all_passed_requires_bring_up_and_zero_failures() {
        let ok = IntegrationReport {
            brought_up: true,
            tests: vec![IntegrationTestResult {
                category: "contract".into(),
                passed: 4,
                failed: 0,
                details: vec![],
            }],
            violations: vec![],
            generated_at: Utc::now(),
        };
        assert!(ok.all_passed());

        let failed = IntegrationReport {
            brought_up: true,
            tests: vec![IntegrationTestResult {
                category: "contract".into(),
                passed: 3,
                failed: 1,
                details: vec![],
            }],
            violations: vec![],
            generated_at: Utc::now(),
        };
        assert!(!failed.all_passed());

        let never_up = IntegrationReport {
            brought_up: false,
            tests: vec![],
            violations: vec![],
            generated_at: Utc::now(),
        };
        assert!(!never_up.all_passed());
    }

    #[test]
    fn pipeline_state_new_starts_in_init_with_zero_cost() {
        let state = PipelineState::new(50.0);
        assert_eq!(state.phase, Phase::Init);
        assert_eq!(state.cost_total, 0.0);
        assert_eq!(state.budget_limit, 50.0);
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn pipeline_state_round_trips_through_json() {
        let state = PipelineState::new(10.0);
        let json = serde_json::to_string(&state).expect("serialize");
        let back: PipelineState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.phase, state.phase);
        assert_eq!(back.budget_limit, state.budget_limit);
    }

    #[test]
    fn severity_ordering_places_blocking_highest() {
        let mut severities = vec![Severity::Blocking, Severity::Info, Severity::Major];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Info, Severity::Major, Severity::Blocking]
        );
    }
}
</content>
