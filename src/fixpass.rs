//! Fix-pass convergence engine (§4.10): DISCOVER, CLASSIFY, GENERATE happen
//! here in the `fix_pass` phase; APPLY happens back in `builders_running`
//! (the `fix_done` transition routes there, per the state machine's guard
//! table); VERIFY and REGRESS happen in the next `quality_gate` pass, which
//! calls [`finalize`] to score this pass against the gate report it
//! produces and decide convergence.
//!
//! Grounded on the `decomposition` module's config/executor split
//! (classification-as-data, generation-as-template).

use std::path::Path;

use tracing::info;

use crate::error::FixPassError;
use crate::models::{FixPassResult, FixPriority, QualityGateReport, ScanViolation, ServiceInfo, Severity};

#[derive(Debug, Clone)]
pub struct FixPassConfig {
    pub max_fix_passes: u32,
}

/// Outcome of checking hard stops and soft convergence after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceDecision {
    Converged,
    KeepGoing,
    Exhausted,
}

/// Classify every violation into a [`FixPriority`] bucket. Blocking issues
/// are always P0; a violation affecting a service with dependents is
/// promoted one priority level (graph-neighbor promotion), mirroring how a
/// break in a depended-on service tends to cascade.
pub fn classify(
    violations: &[ScanViolation],
    services: &[ServiceInfo],
) -> Vec<(FixPriority, ScanViolation)> {
    violations
        .iter()
        .map(|v| {
            let mut priority = match v.severity {
                Severity::Blocking => FixPriority::P0,
                Severity::Major => FixPriority::P1,
                Severity::Minor => FixPriority::P2,
                Severity::Info => FixPriority::P3,
            };
            if let Some(service_name) = &v.service {
                let has_dependents = services
                    .iter()
                    .any(|s| s.depends_on.iter().any(|d| d == service_name));
                if has_dependents && priority != FixPriority::P0 {
                    priority = promote(priority);
                }
            }
            (priority, v.clone())
        })
        .collect()
}

fn promote(priority: FixPriority) -> FixPriority {
    match priority {
        FixPriority::P3 => FixPriority::P2,
        FixPriority::P2 => FixPriority::P1,
        FixPriority::P1 => FixPriority::P0,
        FixPriority::P0 => FixPriority::P0,
    }
}

/// Write `FIX_INSTRUCTIONS.md` for a service, listing its assigned
/// violations in priority order. The `builders_running` handler looks for
/// this file's presence to decide which services need a quick-depth rerun.
pub fn generate_instructions(
    service_dir: &Path,
    classified: &[(FixPriority, ScanViolation)],
) -> Result<(), FixPassError> {
    let mut body = String::from("# Fix instructions\n\n");
    let mut sorted = classified.to_vec();
    sorted.sort_by_key(|(priority, _)| *priority);
    for (priority, violation) in &sorted {
        body.push_str(&format!(
            "- [{priority:?}] {} ({}): {}\n",
            violation.code, violation.category, violation.message
        ));
    }
    std::fs::write(service_dir.join("FIX_INSTRUCTIONS.md"), body).map_err(|source| {
        FixPassError::InstructionsWriteFailed {
            service: service_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            source,
        }
    })
}

/// DISCOVER + CLASSIFY + GENERATE: snapshot the violations from the last
/// quality gate report, assign priorities, and write `FIX_INSTRUCTIONS.md`
/// for every affected service. Returns the pass's starting [`FixPassResult`]
/// (its `after_count`/`regression_rate`/`converged` fields are filled in
/// later by [`finalize`], once APPLY has run and the next gate has VERIFYed
/// it).
pub fn discover_classify_generate(
    pass: u32,
    services: &[ServiceInfo],
    previous_gate: &QualityGateReport,
    output_dir: &Path,
) -> Result<FixPassResult, FixPassError> {
    let all_violations: Vec<ScanViolation> = previous_gate
        .layers
        .iter()
        .flat_map(|l| l.violations.clone())
        .collect();

    let classified = classify(&all_violations, services);
    let p0_count = classified.iter().filter(|(p, _)| *p == FixPriority::P0).count() as u32;
    let p1_count = classified.iter().filter(|(p, _)| *p == FixPriority::P1).count() as u32;
    let p2_count = classified.iter().filter(|(p, _)| *p == FixPriority::P2).count() as u32;
    let p3_count = classified.iter().filter(|(p, _)| *p == FixPriority::P3).count() as u32;

    let mut fixes_generated = 0u32;
    for service in services {
        let service_classified: Vec<_> = classified
            .iter()
            .filter(|(_, v)| v.service.as_deref() == Some(service.name.as_str()))
            .cloned()
            .collect();
        if service_classified.is_empty() {
            continue;
        }
        let service_dir = output_dir.join("builders").join(&service.name);
        generate_instructions(&service_dir, &service_classified)?;
        fixes_generated += 1;
    }

    info!(pass, p0_count, p1_count, p2_count, p3_count, fixes_generated, "fix pass generated");

    Ok(FixPassResult {
        pass,
        p0_count,
        p1_count,
        p2_count,
        p3_count,
        fixes_generated,
        fixes_applied: 0,
        before_count: all_violations.len(),
        after_count: None,
        effectiveness: 0.0,
        regression_rate: 0.0,
        weighted_score: 0.0,
        converged: false,
    })
}

/// VERIFY + REGRESS: given the pass's starting snapshot and the new gate
/// report produced once `builders_running` re-ran the affected services,
/// compute effectiveness, regression rate, the weighted convergence score,
/// and the hard/soft-stop decision. `initial_weighted` is the weighted P0/
/// P1/P2 score of the very first fix pass in this run, the denominator the
/// spec's convergence-score formula normalizes against.
pub fn finalize(
    result: &mut FixPassResult,
    fixes_applied: u32,
    new_gate: &QualityGateReport,
    config: &FixPassConfig,
    remaining_budget: f64,
    initial_weighted: f64,
) -> ConvergenceDecision {
    let after_violations: Vec<&ScanViolation> =
        new_gate.layers.iter().flat_map(|l| l.violations.iter()).collect();
    let after_count = after_violations.len();

    let resolved = result.before_count.saturating_sub(after_count);
    let effectiveness = if result.before_count == 0 {
        1.0
    } else {
        resolved as f64 / result.before_count as f64
    };

    let new_blocking = after_violations
        .iter()
        .filter(|v| v.severity == Severity::Blocking)
        .count();
    let regression_rate = if result.before_count == 0 {
        0.0
    } else {
        new_blocking.saturating_sub(0) as f64 / result.before_count.max(1) as f64
    };

    let p0_after = new_gate
        .layers
        .iter()
        .flat_map(|l| l.violations.iter())
        .filter(|v| v.severity == Severity::Blocking)
        .count() as u32;
    let p1_after = new_gate
        .layers
        .iter()
        .flat_map(|l| l.violations.iter())
        .filter(|v| v.severity == Severity::Major)
        .count() as u32;
    let p2_after = new_gate
        .layers
        .iter()
        .flat_map(|l| l.violations.iter())
        .filter(|v| v.severity == Severity::Minor)
        .count() as u32;

    let weighted_remaining = 0.4 * p0_after as f64 + 0.3 * p1_after as f64 + 0.1 * p2_after as f64;
    let weighted_score = if initial_weighted <= 0.0 {
        1.0
    } else {
        (1.0 - weighted_remaining / initial_weighted).max(0.0)
    };

    result.after_count = Some(after_count);
    result.fixes_applied = fixes_applied;
    result.effectiveness = effectiveness;
    result.regression_rate = regression_rate;
    result.weighted_score = weighted_score;

    let decision = decide_convergence(
        result.pass,
        config.max_fix_passes,
        p0_after,
        p1_after,
        effectiveness,
        regression_rate,
        weighted_score,
        remaining_budget,
    );
    result.converged = decision == ConvergenceDecision::Converged;
    decision
}

/// Hard stops checked before soft convergence, in the order the spec
/// prescribes: zero-remaining blocking/major, pass budget, remaining
/// budget, effectiveness floor, regression ceiling; then the soft
/// convergence score.
#[allow(clippy::too_many_arguments)]
pub fn decide_convergence(
    pass: u32,
    max_fix_passes: u32,
    p0_count: u32,
    p1_count: u32,
    effectiveness: f64,
    regression_rate: f64,
    weighted_score: f64,
    remaining_budget: f64,
) -> ConvergenceDecision {
    if p0_count == 0 && p1_count == 0 {
        return ConvergenceDecision::Converged;
    }
    if pass >= max_fix_passes {
        return ConvergenceDecision::Exhausted;
    }
    if remaining_budget <= 0.0 {
        return ConvergenceDecision::Exhausted;
    }
    if effectiveness < 0.30 {
        return ConvergenceDecision::Exhausted;
    }
    if regression_rate > 0.25 {
        return ConvergenceDecision::Exhausted;
    }
    if weighted_score >= 0.85 {
        return ConvergenceDecision::Converged;
    }
    ConvergenceDecision::KeepGoing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LayerResult, Verdict};

    fn violation(severity: Severity, service: &str) -> ScanViolation {
        ScanViolation {
            code: "X001".to_string(),
            category: "security".to_string(),
            severity,
            service: Some(service.to_string()),
            message: "test".to_string(),
            location: None,
        }
    }

    fn service(name: &str, depends_on: Vec<&str>) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            description: "".into(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            owns_data: vec![],
            stack: Default::default(),
            port: 8080,
            health_endpoint: "/health".into(),
            events: None,
        }
    }

    fn gate_with(violations: Vec<ScanViolation>) -> QualityGateReport {
        QualityGateReport {
            overall: Verdict::Partial,
            layers: vec![LayerResult {
                layer: 3,
                verdict: Verdict::Partial,
                violations,
            }],
            generated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn classify_maps_severity_to_priority() {
        let services = vec![service("users", vec![])];
        let violations = vec![violation(Severity::Blocking, "users")];
        let classified = classify(&violations, &services);
        assert_eq!(classified[0].0, FixPriority::P0);
    }

    #[test]
    fn classify_promotes_priority_for_services_with_dependents() {
        let services = vec![service("users", vec![]), service("orders", vec!["users"])];
        let violations = vec![violation(Severity::Minor, "users")];
        let classified = classify(&violations, &services);
        assert_eq!(classified[0].0, FixPriority::P1);
    }

    #[test]
    fn discover_classify_generate_writes_instructions_for_affected_services() {
        let dir = tempfile::tempdir().unwrap();
        let services = vec![service("users", vec![])];
        let gate = gate_with(vec![violation(Severity::Blocking, "users")]);
        let result = discover_classify_generate(1, &services, &gate, dir.path()).unwrap();
        assert_eq!(result.p0_count, 1);
        assert_eq!(result.fixes_generated, 1);
        assert_eq!(result.before_count, 1);
        assert!(dir.path().join("builders/users/FIX_INSTRUCTIONS.md").exists());
    }

    #[test]
    fn finalize_converges_once_blocking_and_major_are_gone() {
        let mut result = discover_classify_generate(
            1,
            &[service("users", vec![])],
            &gate_with(vec![violation(Severity::Blocking, "users")]),
            tempfile::tempdir().unwrap().path(),
        )
        .unwrap();
        let new_gate = gate_with(vec![]);
        let decision = finalize(&mut result, 1, &new_gate, &FixPassConfig { max_fix_passes: 5 }, 10.0, 0.4);
        assert_eq!(decision, ConvergenceDecision::Converged);
        assert!(result.converged);
        assert_eq!(result.after_count, Some(0));
        assert_eq!(result.effectiveness, 1.0);
    }

    #[test]
    fn finalize_exhausts_when_pass_budget_runs_out() {
        let mut result = discover_classify_generate(
            5,
            &[service("users", vec![])],
            &gate_with(vec![violation(Severity::Blocking, "users"), violation(Severity::Major, "users")]),
            tempfile::tempdir().unwrap().path(),
        )
        .unwrap();
        let new_gate = gate_with(vec![violation(Severity::Major, "users")]);
        let decision = finalize(&mut result, 1, &new_gate, &FixPassConfig { max_fix_passes: 5 }, 10.0, 0.7);
        assert_eq!(decision, ConvergenceDecision::Exhausted);
    }

    #[test]
    fn finalize_exhausts_when_remaining_budget_is_spent() {
        let mut result = discover_classify_generate(
            1,
            &[service("users", vec![])],
            &gate_with(vec![violation(Severity::Blocking, "users")]),
            tempfile::tempdir().unwrap().path(),
        )
        .unwrap();
        let new_gate = gate_with(vec![violation(Severity::Blocking, "users")]);
        let decision = finalize(&mut result, 1, &new_gate, &FixPassConfig { max_fix_passes: 5 }, 0.0, 0.4);
        assert_eq!(decision, ConvergenceDecision::Exhausted);
    }

    #[test]
    fn decide_convergence_converges_when_no_p0_or_p1() {
        let decision = decide_convergence(1, 5, 0, 0, 0.5, 0.0, 0.5, 10.0);
        assert_eq!(decision, ConvergenceDecision::Converged);
    }

    #[test]
    fn decide_convergence_exhausts_at_max_passes() {
        let decision = decide_convergence(5, 5, 1, 0, 0.5, 0.0, 0.5, 10.0);
        assert_eq!(decision, ConvergenceDecision::Exhausted);
    }

    #[test]
    fn decide_convergence_exhausts_below_effectiveness_floor() {
        let decision = decide_convergence(1, 5, 1, 0, 0.2, 0.0, 0.5, 10.0);
        assert_eq!(decision, ConvergenceDecision::Exhausted);
    }

    #[test]
    fn decide_convergence_exhausts_above_regression_ceiling() {
        let decision = decide_convergence(1, 5, 1, 0, 0.5, 0.3, 0.5, 10.0);
        assert_eq!(decision, ConvergenceDecision::Exhausted);
    }

    #[test]
    fn decide_convergence_converges_on_high_weighted_score() {
        let decision = decide_convergence(1, 5, 1, 0, 0.9, 0.0, 0.9, 10.0);
        assert_eq!(decision, ConvergenceDecision::Converged);
    }

    #[test]
    fn decide_convergence_keeps_going_otherwise() {
        let decision = decide_convergence(1, 5, 1, 0, 0.5, 0.0, 0.5, 10.0);
        assert_eq!(decision, ConvergenceDecision::KeepGoing);
    }
}
</content>
