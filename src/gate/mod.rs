//! Quality gate engine (§4.9): four layers run in sequence, each gating
//! promotion to the next. Layer 4 (adversarial) is always forced to
//! `Passed` — it's advisory, surfaced in the report but never blocking.
//!
//! Grounded on `review::specialists`'s `ReviewSpecialist`/`SpecialistType`
//! tagged-variant pattern for the scanner interface, generalized here into a
//! promotion-gated pipeline (the teacher's review system is interactive and
//! advisory throughout, not promotion-gated).

pub mod scanners;

use std::collections::HashMap;

use tracing::info;

use crate::error::GateError;
use crate::models::{
    BuilderResult, IntegrationReport, LayerResult, QualityGateReport, ScanViolation, ServiceInfo,
    Severity, Verdict,
};

/// Cap on violations reported per category, to keep the report bounded on a
/// pathological service. Violations beyond the cap are counted but not
/// individually listed.
pub const MAX_VIOLATIONS_PER_CATEGORY: usize = 200;

pub use scanners::{SYSTEM_CATEGORIES, layer1_per_service, layer2_contract, layer3_system, layer4_adversarial};

/// Run all four layers in sequence (1 and 2 must pass promotion before 3
/// runs; 3's categories run concurrently internally; 4 always runs last and
/// always reports Passed).
pub async fn run_gate(
    services: &[ServiceInfo],
    builder_results: &HashMap<String, BuilderResult>,
    integration_report: Option<&IntegrationReport>,
) -> Result<QualityGateReport, GateError> {
    let mut layers = Vec::with_capacity(4);

    let layer1 = layer1_per_service(services, builder_results).await?;
    let layer1_verdict = layer1.verdict;
    layers.push(layer1);
    if !promotes(layer1_verdict) {
        layers.extend([skipped(2), skipped(3), skipped(4)]);
        return Ok(finalize(layers));
    }

    let layer2 = layer2_contract(services, integration_report).await?;
    let layer2_verdict = layer2.verdict;
    layers.push(layer2);
    if !promotes(layer2_verdict) {
        layers.extend([skipped(3), skipped(4)]);
        return Ok(finalize(layers));
    }

    let layer3 = layer3_system(services, builder_results).await?;
    layers.push(layer3);

    let layer4 = layer4_adversarial(services).await?;
    layers.push(layer4);

    Ok(finalize(layers))
}

/// A placeholder result for a layer that never ran because an earlier layer
/// failed to promote (§4.9's short-circuit rule).
fn skipped(layer: u8) -> LayerResult {
    LayerResult {
        layer,
        verdict: Verdict::Skipped,
        violations: vec![],
    }
}

fn finalize(layers: Vec<LayerResult>) -> QualityGateReport {
    let report = QualityGateReport {
        overall: Verdict::Passed,
        layers,
        generated_at: chrono::Utc::now(),
    };
    let overall = report.worst_of_first_three();
    info!(?overall, "quality gate finished");
    QualityGateReport { overall, ..report }
}

/// Promotion rule: PASSED or PARTIAL promotes, with no blocking-severity
/// violation. FAILED never promotes.
fn promotes(verdict: Verdict) -> bool {
    matches!(verdict, Verdict::Passed | Verdict::Partial)
}

/// Derive a layer verdict from its violations: any blocking violation fails
/// the layer outright; any non-blocking violation is a partial pass; zero
/// violations is a clean pass.
pub fn verdict_from_violations(violations: &[ScanViolation]) -> Verdict {
    if violations.iter().any(|v| v.severity == Severity::Blocking) {
        Verdict::Failed
    } else if violations.is_empty() {
        Verdict::Passed
    } else {
        Verdict::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(severity: Severity) -> ScanViolation {
        ScanViolation {
            code: "X001".to_string(),
            category: "style".to_string(),
            severity,
            service: None,
            message: "test".to_string(),
            location: None,
        }
    }

    fn service(name: &str) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            description: "".into(),
            depends_on: vec![],
            owns_data: vec![],
            stack: Default::default(),
            port: 8080,
            health_endpoint: "/health".into(),
            events: None,
        }
    }

    fn passing_result(name: &str) -> BuilderResult {
        BuilderResult {
            service: name.to_string(),
            success: true,
            cost: 1.0,
            duration_seconds: 10.0,
            fallback: false,
            error: None,
            output_dir: Default::default(),
            tests_passed: 10,
            tests_total: 10,
            artifacts: vec![],
        }
    }

    #[test]
    fn verdict_from_violations_passes_with_no_violations() {
        assert_eq!(verdict_from_violations(&[]), Verdict::Passed);
    }

    #[test]
    fn verdict_from_violations_is_partial_with_only_minor() {
        let violations = vec![violation(Severity::Minor)];
        assert_eq!(verdict_from_violations(&violations), Verdict::Partial);
    }

    #[test]
    fn verdict_from_violations_fails_with_any_blocking() {
        let violations = vec![violation(Severity::Minor), violation(Severity::Blocking)];
        assert_eq!(verdict_from_violations(&violations), Verdict::Failed);
    }

    #[tokio::test]
    async fn run_gate_short_circuits_when_a_builder_never_ran() {
        let services = vec![service("users")];
        let results = HashMap::new();
        let report = run_gate(&services, &results, None).await.unwrap();
        assert_eq!(report.layers.len(), 4);
        assert_eq!(report.layers[0].verdict, Verdict::Failed);
        assert!(report.layers[1..].iter().all(|l| l.verdict == Verdict::Skipped));
        assert_eq!(report.overall, Verdict::Failed);
    }

    #[tokio::test]
    async fn run_gate_runs_all_four_layers_when_clean() {
        let services = vec![service("users")];
        let mut results = HashMap::new();
        results.insert("users".to_string(), passing_result("users"));
        let report = run_gate(&services, &results, None).await.unwrap();
        assert_eq!(report.layers.len(), 4);
        assert_eq!(report.overall, Verdict::Passed);
    }
}
</content>
