//! The four gate layers. Each returns a [`LayerResult`] built from a list of
//! [`ScanViolation`]s via [`super::verdict_from_violations`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::GateError;
use crate::gate::{MAX_VIOLATIONS_PER_CATEGORY, verdict_from_violations};
use crate::models::{
    BuilderResult, IntegrationReport, LayerResult, ScanViolation, ServiceInfo, Severity, Verdict,
};

/// System-level scan categories (layer 3), one per spec-named concern.
/// Each runs as its own concurrent scan task.
pub const SYSTEM_CATEGORIES: &[&str] = &[
    "jwt_security",
    "cors",
    "secret_detection",
    "logging",
    "trace_propagation",
    "health_endpoints",
    "docker_security",
];

/// Minimum fraction of a builder's own test suite that must pass for the
/// service to clear layer 1 without a violation.
const MIN_CONVERGENCE_RATIO: f64 = 0.8;

/// Layer 1: independent per-service checks against what the builder actually
/// produced — did it report success, and did its own test suite mostly
/// pass. A service with no `BuilderResult` at all (never ran) is treated as
/// a blocking failure, since the gate cannot assess code that doesn't exist.
pub async fn layer1_per_service(
    services: &[ServiceInfo],
    builder_results: &HashMap<String, BuilderResult>,
) -> Result<LayerResult, GateError> {
    let mut violations = Vec::new();
    for service in services {
        match builder_results.get(&service.name) {
            None => violations.push(ScanViolation {
                code: "BLD001".to_string(),
                category: "correctness".to_string(),
                severity: Severity::Blocking,
                service: Some(service.name.clone()),
                message: "no builder result recorded for this service".to_string(),
                location: None,
            }),
            Some(result) if !result.success => violations.push(ScanViolation {
                code: "BLD002".to_string(),
                category: "correctness".to_string(),
                severity: Severity::Blocking,
                service: Some(service.name.clone()),
                message: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "builder reported failure".to_string()),
                location: None,
            }),
            Some(result) if result.convergence_ratio() < MIN_CONVERGENCE_RATIO => {
                violations.push(ScanViolation {
                    code: "BLD003".to_string(),
                    category: "correctness".to_string(),
                    severity: Severity::Major,
                    service: Some(service.name.clone()),
                    message: format!(
                        "only {}/{} of this service's own tests passed",
                        result.tests_passed, result.tests_total
                    ),
                    location: None,
                })
            }
            Some(_) => {}
        }
    }
    cap_violations(&mut violations);
    Ok(LayerResult {
        layer: 1,
        verdict: verdict_from_violations(&violations),
        violations,
    })
}

/// Layer 2: cross-service contract consistency, read from the integration
/// harness's own contract-violation findings (declared vs. implemented
/// API/event shapes) plus any failed `contract` test category.
pub async fn layer2_contract(
    _services: &[ServiceInfo],
    integration_report: Option<&IntegrationReport>,
) -> Result<LayerResult, GateError> {
    let mut violations = Vec::new();
    if let Some(report) = integration_report {
        for contract_violation in &report.violations {
            violations.push(ScanViolation {
                code: "CTR001".to_string(),
                category: "contracts".to_string(),
                severity: contract_violation.severity,
                service: Some(contract_violation.service.clone()),
                message: contract_violation.description.clone(),
                location: Some(contract_violation.contract.clone()),
            });
        }
        for test in report.tests.iter().filter(|t| t.category == "contract" && t.failed > 0) {
            violations.push(ScanViolation {
                code: "CTR002".to_string(),
                category: "contracts".to_string(),
                severity: Severity::Major,
                service: None,
                message: format!("{} contract test(s) failed", test.failed),
                location: None,
            });
        }
    }
    cap_violations(&mut violations);
    Ok(LayerResult {
        layer: 2,
        verdict: verdict_from_violations(&violations),
        violations,
    })
}

/// Layer 3: system-level scan across the spec's 7 named categories, run
/// concurrently against each service's builder output directory. Each
/// category scan is a pluggable unit — `scan_category` is the seam a real
/// static-analysis backend plugs into.
///
/// Grounded on `src/review/specialists.rs`'s finding-generation shape and
/// `src/signals/parser.rs`'s `LazyLock<Regex>` compiled-once pattern.
pub async fn layer3_system(
    services: &[ServiceInfo],
    builder_results: &HashMap<String, BuilderResult>,
) -> Result<LayerResult, GateError> {
    let service_dirs: HashMap<String, PathBuf> = services
        .iter()
        .filter_map(|s| builder_results.get(&s.name).map(|r| (s.name.clone(), r.output_dir.clone())))
        .collect();

    let handles: Vec<_> = SYSTEM_CATEGORIES
        .iter()
        .map(|category| {
            let services = services.to_vec();
            let service_dirs = service_dirs.clone();
            let category = category.to_string();
            // Scanning is blocking filesystem I/O (walkdir + read_to_string),
            // so this runs on the blocking pool rather than the async one.
            tokio::task::spawn_blocking(move || scan_category(&category, &services, &service_dirs))
        })
        .collect();

    let mut violations = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(mut found) => violations.append(&mut found),
            Err(_) => {
                return Err(GateError::ScannerFailed {
                    layer: 3,
                    message: "a category scan task panicked".to_string(),
                });
            }
        }
    }
    cap_violations(&mut violations);
    Ok(LayerResult {
        layer: 3,
        verdict: verdict_from_violations(&violations),
        violations,
    })
}

/// One category's scan across every service that actually produced an
/// output directory. A service the builder never ran for (no `BuilderResult`
/// or a directory that doesn't exist) is simply skipped here — layer 1
/// already flagged it as blocking.
fn scan_category(
    category: &str,
    services: &[ServiceInfo],
    service_dirs: &HashMap<String, PathBuf>,
) -> Vec<ScanViolation> {
    let mut violations = Vec::new();
    for service in services {
        let Some(dir) = service_dirs.get(&service.name) else {
            continue;
        };
        if !dir.is_dir() {
            continue;
        }
        match category {
            "jwt_security" => violations.extend(scan_with_rules(&JWT_RULES, "jwt_security", &service.name, dir)),
            "cors" => violations.extend(scan_with_rules(&CORS_RULES, "cors", &service.name, dir)),
            "secret_detection" => {
                violations.extend(scan_with_rules(&SECRET_RULES, "secret_detection", &service.name, dir))
            }
            "logging" => violations.extend(scan_with_rules(&LOGGING_RULES, "logging", &service.name, dir)),
            "trace_propagation" => violations.extend(scan_trace_propagation(&service.name, dir)),
            "health_endpoints" => violations.extend(scan_health_endpoint(service, dir)),
            "docker_security" => violations.extend(scan_docker_security(&service.name, dir)),
            _ => {}
        }
    }
    violations
}

/// A single compiled rule: catalog code, severity, the pattern it matches
/// per line, and the human-readable message it reports.
type Rule = (&'static str, Severity, Regex, &'static str);

static JWT_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        (
            "JWT001",
            Severity::Blocking,
            Regex::new(r#"(?i)"?alg"?\s*[:=]\s*"?none"?"#).unwrap(),
            "JWT accepts alg=none, which disables signature verification",
        ),
        (
            "JWT002",
            Severity::Blocking,
            Regex::new(r"(?i)\bverify\s*[:=]\s*false\b").unwrap(),
            "JWT signature verification is explicitly disabled",
        ),
        (
            "JWT003",
            Severity::Major,
            Regex::new(r#"(?i)jwt_secret\s*[:=]\s*"[^"]{1,15}""#).unwrap(),
            "JWT secret is short and looks hardcoded",
        ),
    ]
});

static CORS_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        (
            "CORS001",
            Severity::Blocking,
            Regex::new(r#"(?i)access-control-allow-origin"?\s*[:=]\s*"?\*"#).unwrap(),
            "CORS allows any origin (Access-Control-Allow-Origin: *)",
        ),
        (
            "CORS002",
            Severity::Major,
            Regex::new(r"(?i)corslayer::permissive\(\)").unwrap(),
            "a permissive CORS layer is installed",
        ),
        (
            "CORS003",
            Severity::Major,
            Regex::new(r"(?i)alloworigin::any\(\)").unwrap(),
            "CORS origin allowlist is set to Any",
        ),
    ]
});

static SECRET_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        (
            "SEC001",
            Severity::Blocking,
            Regex::new(r#"(?i)(api[_-]?key|secret|password)\s*[:=]\s*"[A-Za-z0-9/+=_-]{12,}""#).unwrap(),
            "hardcoded credential-shaped literal found in source",
        ),
        (
            "SEC002",
            Severity::Blocking,
            Regex::new(r"AKIA[0-9A-Z]{16}").unwrap(),
            "AWS access key id literal found in source",
        ),
        (
            "SEC003",
            Severity::Blocking,
            Regex::new(r"sk-[A-Za-z0-9]{20,}").unwrap(),
            "API secret key literal found in source",
        ),
        (
            "SEC004",
            Severity::Major,
            Regex::new(r"-----BEGIN (RSA |EC )?PRIVATE KEY-----").unwrap(),
            "embedded private key material found in source",
        ),
    ]
});

static LOGGING_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        (
            "LOG001",
            Severity::Minor,
            Regex::new(r"\b(?:println|eprintln|print)!\(").unwrap(),
            "unstructured stdout/stderr logging instead of the tracing crate",
        ),
        (
            "LOG002",
            Severity::Major,
            Regex::new(r"(?i)(?:tracing|log)::(?:info|debug|warn|error)!\([^)]*\b(?:password|secret|token)\b")
                .unwrap(),
            "a log statement appears to include a sensitive field",
        ),
    ]
});

static DOCKER_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        (
            "DOCK001",
            Severity::Major,
            Regex::new(r"(?i)^\s*FROM\s+\S+:latest\b").unwrap(),
            "base image pinned to the :latest tag",
        ),
        (
            "DOCK002",
            Severity::Major,
            Regex::new(r"(?i)^\s*ADD\s+https?://").unwrap(),
            "ADD fetches remote content directly; prefer a verified COPY/RUN download",
        ),
        (
            "DOCK003",
            Severity::Blocking,
            Regex::new(r"(?i)^\s*USER\s+root\b").unwrap(),
            "container explicitly runs as root",
        ),
    ]
});

/// Directories whose contents are never source we care about (build
/// artifacts, VCS metadata, vendored dependencies).
fn is_vendor_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && matches!(
            entry.file_name().to_str(),
            Some("target" | ".git" | "node_modules" | "dist" | "build")
        )
}

fn text_files(dir: &Path) -> impl Iterator<Item = (PathBuf, String)> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_vendor_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| std::fs::read_to_string(e.path()).ok().map(|contents| (e.path().to_path_buf(), contents)))
}

fn location(dir: &Path, service: &str, path: &Path, line: usize) -> String {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    format!("{service}/{}:{}", relative.display(), line + 1)
}

/// Apply a category's line-oriented rules to every text file under `dir`.
fn scan_with_rules(rules: &[Rule], category: &str, service: &str, dir: &Path) -> Vec<ScanViolation> {
    let mut violations = Vec::new();
    for (path, contents) in text_files(dir) {
        for (line_no, line) in contents.lines().enumerate() {
            for (code, severity, pattern, message) in rules {
                if pattern.is_match(line) {
                    violations.push(ScanViolation {
                        code: code.to_string(),
                        category: category.to_string(),
                        severity: *severity,
                        service: Some(service.to_string()),
                        message: message.to_string(),
                        location: Some(location(dir, service, &path, line_no)),
                    });
                }
            }
        }
    }
    violations
}

/// Dockerfiles get their own line rules plus a whole-file check: a
/// Dockerfile with no `USER` directive at all defaults to root just as
/// surely as one with `USER root`.
fn scan_docker_security(service: &str, dir: &Path) -> Vec<ScanViolation> {
    let mut violations = Vec::new();
    for (path, contents) in text_files(dir) {
        let is_dockerfile = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == "Dockerfile" || n.starts_with("Dockerfile."))
            .unwrap_or(false);
        if !is_dockerfile {
            continue;
        }
        for (line_no, line) in contents.lines().enumerate() {
            for (code, severity, pattern, message) in DOCKER_RULES.iter() {
                if pattern.is_match(line) {
                    violations.push(ScanViolation {
                        code: code.to_string(),
                        category: "docker_security".to_string(),
                        severity: *severity,
                        service: Some(service.to_string()),
                        message: message.to_string(),
                        location: Some(location(dir, service, &path, line_no)),
                    });
                }
            }
        }
        if !contents.lines().any(|l| Regex::new(r"(?i)^\s*USER\s+\S+").unwrap().is_match(l)) {
            violations.push(ScanViolation {
                code: "DOCK004".to_string(),
                category: "docker_security".to_string(),
                severity: Severity::Blocking,
                service: Some(service.to_string()),
                message: "Dockerfile has no USER directive; container defaults to root".to_string(),
                location: Some(location(dir, service, &path, 0)),
            });
        }
    }
    violations
}

/// A service whose generated code never mentions its own configured health
/// endpoint has nothing for the container runtime's healthcheck to hit.
fn scan_health_endpoint(service: &ServiceInfo, dir: &Path) -> Vec<ScanViolation> {
    let found = text_files(dir).any(|(_, contents)| contents.contains(&service.health_endpoint));
    if found {
        return Vec::new();
    }
    vec![ScanViolation {
        code: "HEALTH001".to_string(),
        category: "health_endpoints".to_string(),
        severity: Severity::Blocking,
        service: Some(service.name.clone()),
        message: format!("no route for the configured health endpoint {} was found", service.health_endpoint),
        location: None,
    }]
}

static OUTBOUND_CLIENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)reqwest::|hyper::client|http_client").unwrap());

/// A service that makes outbound calls but never mentions a trace-context
/// header anywhere in its own source has no way to propagate a trace id
/// to the services it calls.
fn scan_trace_propagation(service: &str, dir: &Path) -> Vec<ScanViolation> {
    let mut makes_outbound_calls = false;
    let mut propagates_trace = false;
    for (_, contents) in text_files(dir) {
        if OUTBOUND_CLIENT_PATTERN.is_match(&contents) {
            makes_outbound_calls = true;
        }
        if contents.to_lowercase().contains("traceparent") {
            propagates_trace = true;
        }
    }
    if makes_outbound_calls && !propagates_trace {
        return vec![ScanViolation {
            code: "TRACE001".to_string(),
            category: "trace_propagation".to_string(),
            severity: Severity::Major,
            service: Some(service.to_string()),
            message: "service makes outbound calls but never propagates a traceparent header".to_string(),
            location: None,
        }];
    }
    Vec::new()
}

/// Layer 4: adversarial probing. Always reports `Passed` — findings are
/// advisory, surfaced but never blocking promotion.
pub async fn layer4_adversarial(_services: &[ServiceInfo]) -> Result<LayerResult, GateError> {
    Ok(LayerResult {
        layer: 4,
        verdict: Verdict::Passed,
        violations: Vec::new(),
    })
}

fn cap_violations(violations: &mut Vec<ScanViolation>) {
    let mut per_category: HashMap<String, usize> = HashMap::new();
    violations.retain(|v| {
        let count = per_category.entry(v.category.clone()).or_insert(0);
        *count += 1;
        *count <= MAX_VIOLATIONS_PER_CATEGORY
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing_result(service: &str) -> BuilderResult {
        BuilderResult {
            service: service.to_string(),
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

    #[tokio::test]
    async fn layer1_flags_service_with_no_builder_result() {
        let services = vec![service("users")];
        let results = HashMap::new();
        let result = layer1_per_service(&services, &results).await.unwrap();
        assert_eq!(result.verdict, Verdict::Failed);
        assert_eq!(result.violations[0].code, "BLD001");
    }

    #[tokio::test]
    async fn layer1_flags_builder_failure_as_blocking() {
        let services = vec![service("users")];
        let mut results = HashMap::new();
        let mut failed = passing_result("users");
        failed.success = false;
        failed.error = Some("compile error".to_string());
        results.insert("users".to_string(), failed);
        let result = layer1_per_service(&services, &results).await.unwrap();
        assert_eq!(result.verdict, Verdict::Failed);
    }

    #[tokio::test]
    async fn layer1_flags_low_test_convergence_as_major_not_blocking() {
        let services = vec![service("users")];
        let mut results = HashMap::new();
        let mut low = passing_result("users");
        low.tests_passed = 3;
        low.tests_total = 10;
        results.insert("users".to_string(), low);
        let result = layer1_per_service(&services, &results).await.unwrap();
        assert_eq!(result.verdict, Verdict::Partial);
    }

    #[tokio::test]
    async fn layer1_passes_clean_when_all_builders_converge() {
        let services = vec![service("users")];
        let mut results = HashMap::new();
        results.insert("users".to_string(), passing_result("users"));
        let result = layer1_per_service(&services, &results).await.unwrap();
        assert_eq!(result.verdict, Verdict::Passed);
    }

    #[tokio::test]
    async fn layer2_surfaces_integration_report_contract_violations() {
        use crate::models::ContractViolation;
        let report = IntegrationReport {
            brought_up: true,
            tests: vec![],
            violations: vec![ContractViolation {
                service: "users".into(),
                contract: "users-api".into(),
                description: "missing field".into(),
                severity: Severity::Major,
            }],
            generated_at: chrono::Utc::now(),
        };
        let result = layer2_contract(&[], Some(&report)).await.unwrap();
        assert_eq!(result.verdict, Verdict::Partial);
    }

    #[tokio::test]
    async fn layer2_is_clean_with_no_integration_report() {
        let result = layer2_contract(&[], None).await.unwrap();
        assert_eq!(result.verdict, Verdict::Passed);
    }

    #[tokio::test]
    async fn layer4_is_always_passed_regardless_of_services() {
        let result = layer4_adversarial(&[]).await.unwrap();
        assert_eq!(result.verdict, Verdict::Passed);
    }

    #[test]
    fn cap_violations_truncates_per_category() {
        let mut violations: Vec<ScanViolation> = (0..MAX_VIOLATIONS_PER_CATEGORY + 10)
            .map(|i| ScanViolation {
                code: format!("X{i}"),
                category: "style".to_string(),
                severity: Severity::Minor,
                service: None,
                message: "".to_string(),
                location: None,
            })
            .collect();
        cap_violations(&mut violations);
        assert_eq!(violations.len(), MAX_VIOLATIONS_PER_CATEGORY);
    }

    #[tokio::test]
    async fn layer3_runs_every_category_without_error_on_empty_services() {
        let result = layer3_system(&[], &HashMap::new()).await.unwrap();
        assert_eq!(result.layer, 3);
        assert_eq!(result.verdict, Verdict::Passed);
    }

    fn service_with_dir(name: &str, dir: &Path) -> (ServiceInfo, HashMap<String, BuilderResult>) {
        let mut results = HashMap::new();
        let mut result = passing_result(name);
        result.output_dir = dir.to_path_buf();
        results.insert(name.to_string(), result);
        (service(name), results)
    }

    #[tokio::test]
    async fn layer3_flags_hardcoded_secret_literal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.rs"), r#"let api_key = "sk-abcdefghijklmnopqrstuvwxyz";"#).unwrap();
        let (svc, results) = service_with_dir("users", tmp.path());
        let result = layer3_system(&[svc], &results).await.unwrap();
        assert!(result.violations.iter().any(|v| v.code == "SEC003"));
    }

    #[tokio::test]
    async fn layer3_flags_dockerfile_with_no_user_directive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), "FROM rust:1\nCOPY . .\nCMD [\"./app\"]\n").unwrap();
        let (svc, results) = service_with_dir("users", tmp.path());
        let result = layer3_system(&[svc], &results).await.unwrap();
        assert!(result.violations.iter().any(|v| v.code == "DOCK004"));
    }

    #[tokio::test]
    async fn layer3_flags_missing_health_endpoint_route() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.rs"), "fn main() {}\n").unwrap();
        let (svc, results) = service_with_dir("users", tmp.path());
        let result = layer3_system(&[svc], &results).await.unwrap();
        assert!(result.violations.iter().any(|v| v.code == "HEALTH001"));
    }

    #[tokio::test]
    async fn layer3_is_clean_for_a_well_formed_service() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("main.rs"),
            "async fn health() -> &'static str { \"/health\" }\n",
        )
        .unwrap();
        let (svc, results) = service_with_dir("users", tmp.path());
        let result = layer3_system(&[svc], &results).await.unwrap();
        assert!(result.violations.is_empty());
    }

    #[tokio::test]
    async fn layer3_skips_services_with_no_builder_output() {
        let result = layer3_system(&[service("users")], &HashMap::new()).await.unwrap();
        assert!(result.violations.is_empty());
    }
}
</content>
