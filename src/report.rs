//! Human-readable report rendering (§6 persisted run layout:
//! `INTEGRATION_REPORT.md`/`.json`, `QUALITY_GATE_REPORT.md`).
//!
//! Grounded on `review::findings::ReviewReport`'s `Display` impl, which
//! writes a verdict-led, findings-indented text block; generalized here into
//! markdown headings since these reports are persisted as `.md` files.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{IntegrationReport, QualityGateReport};

impl fmt::Display for IntegrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Integration report")?;
        writeln!(f)?;
        writeln!(f, "Generated: {}", self.generated_at.to_rfc3339())?;
        writeln!(f, "Brought up: {}", self.brought_up)?;
        writeln!(f, "Overall: {}", if self.all_passed() { "PASSED" } else { "FAILED" })?;
        writeln!(f)?;

        if !self.tests.is_empty() {
            writeln!(f, "## Test categories")?;
            writeln!(f)?;
            for test in &self.tests {
                writeln!(f, "- {}: {} passed / {} failed", test.category, test.passed, test.failed)?;
                for detail in &test.details {
                    writeln!(f, "  - {detail}")?;
                }
            }
            writeln!(f)?;
        }

        if !self.violations.is_empty() {
            writeln!(f, "## Contract violations ({})", self.violations.len())?;
            writeln!(f)?;
            for violation in &self.violations {
                writeln!(
                    f,
                    "- [{:?}] {} / {}: {}",
                    violation.severity, violation.service, violation.contract, violation.description
                )?;
            }
        }

        Ok(())
    }
}

impl fmt::Display for QualityGateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Quality gate report")?;
        writeln!(f)?;
        writeln!(f, "Generated: {}", self.generated_at.to_rfc3339())?;
        writeln!(f, "Overall verdict: {:?}", self.overall)?;
        writeln!(f)?;

        for layer in &self.layers {
            writeln!(f, "## Layer {} — {:?}", layer.layer, layer.verdict)?;
            writeln!(f)?;
            if layer.violations.is_empty() {
                writeln!(f, "No violations.")?;
            } else {
                for violation in &layer.violations {
                    let location = violation
                        .location
                        .as_ref()
                        .map(|l| format!(" ({l})"))
                        .unwrap_or_default();
                    writeln!(
                        f,
                        "- [{:?}/{}] {}{}: {}",
                        violation.severity, violation.category, violation.code, location, violation.message
                    )?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

/// Write `INTEGRATION_REPORT.md` and `.json` alongside it.
pub fn write_integration_report(output_dir: &Path, report: &IntegrationReport) -> Result<()> {
    std::fs::write(output_dir.join("INTEGRATION_REPORT.md"), report.to_string())
        .context("failed to write INTEGRATION_REPORT.md")?;
    crate::store::write_atomic(&output_dir.join("INTEGRATION_REPORT.json"), report)
        .context("failed to write INTEGRATION_REPORT.json")
}

/// Write `QUALITY_GATE_REPORT.md`.
pub fn write_quality_gate_report(output_dir: &Path, report: &QualityGateReport) -> Result<()> {
    std::fs::write(output_dir.join("QUALITY_GATE_REPORT.md"), report.to_string())
        .context("failed to write QUALITY_GATE_REPORT.md")
}

</content>
