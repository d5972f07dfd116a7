use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::collector::RunReport;
use crate::inspection::SecuritySeverity;
use crate::runner::{TestRunResult, TestStatus};
use crate::store::PersistedTest;

/// Plain-text report: per-suite results, failures with their stacks, the
/// inspection summaries, and tests deleted since the previous run.
pub fn write_console_report<W: Write>(out: &mut W, report: &RunReport, deleted: &[PersistedTest]) -> io::Result<()> {
    let meta = &report.metadata;
    write!(out, "apiwarden {} ({}/{}", meta.tool_version, meta.os, meta.arch)?;
    if let Some(environment) = &meta.environment {
        write!(out, ", env {environment}")?;
    }
    if let Some(base_url) = &meta.base_url {
        write!(out, ", {base_url}")?;
    }
    writeln!(out, ")")?;

    for suite in &report.suites {
        writeln!(out)?;
        writeln!(out, "{} ({}ms)", suite.name, suite.duration_ms)?;
        for test in &suite.tests {
            write_test_line(out, test)?;
        }
        for error in &suite.errors {
            writeln!(out, "  HOOK {} failed: {}", error.phase, error.message)?;
        }
    }

    let failures: Vec<&TestRunResult> = report
        .suites
        .iter()
        .flat_map(|suite| suite.tests.iter())
        .filter(|test| test.status == TestStatus::Failed)
        .collect();
    if !failures.is_empty() {
        writeln!(out)?;
        writeln!(out, "Failures:")?;
        for (index, test) in failures.iter().enumerate() {
            writeln!(out, "  {}) {} > {}", index + 1, test.suite, test.name)?;
            if let Some(error) = &test.error {
                for line in error.message.lines() {
                    writeln!(out, "     {line}")?;
                }
                if let Some(stack) = &error.stack {
                    for line in stack.lines() {
                        writeln!(out, "       {line}")?;
                    }
                }
            }
        }
    }

    let counts = &report.summary.counts;
    writeln!(out)?;
    writeln!(
        out,
        "Tests: {} total, {} passed, {} failed, {} skipped, {} todo ({}ms)",
        counts.total, counts.passed, counts.failed, counts.skipped, counts.todo, report.summary.duration_ms
    )?;
    if report.summary.suite_errors > 0 {
        writeln!(out, "Suite hook errors: {}", report.summary.suite_errors)?;
    }

    let governance = &report.governance;
    if !governance.violations.is_empty() || !governance.warnings.is_empty() {
        writeln!(
            out,
            "Governance: {} violations, {} warnings",
            governance.violations.len(),
            governance.warnings.len()
        )?;
        for violation in governance.violations.iter().chain(&governance.warnings) {
            writeln!(
                out,
                "  [{}] {} {} {}: {}",
                violation.severity, violation.rule, violation.method, violation.endpoint, violation.message
            )?;
        }
    }

    let findings = &report.security.findings;
    if !findings.is_empty() {
        let mut by_severity: BTreeMap<SecuritySeverity, usize> = BTreeMap::new();
        for finding in findings {
            *by_severity.entry(finding.severity).or_insert(0) += 1;
        }
        let breakdown: Vec<String> = by_severity
            .iter()
            .map(|(severity, count)| format!("{count} {severity}"))
            .collect();
        writeln!(out, "Security: {} findings ({})", findings.len(), breakdown.join(", "))?;
        for finding in findings {
            writeln!(
                out,
                "  [{}] {} {} {}: {}",
                finding.severity, finding.check, finding.method, finding.endpoint, finding.message
            )?;
        }
    }

    if !deleted.is_empty() {
        writeln!(out, "Deleted tests:")?;
        for test in deleted {
            writeln!(out, "  {} ({}, last seen {})", test.test_slug, test.suite_name, test.last_seen_at)?;
        }
    }

    Ok(())
}

fn write_test_line<W: Write>(out: &mut W, test: &TestRunResult) -> io::Result<()> {
    let marker = match test.status {
        TestStatus::Passed => "PASS",
        TestStatus::Failed => "FAIL",
        TestStatus::Skipped => "SKIP",
        TestStatus::Todo => "TODO",
    };
    write!(out, "  {marker} {}", test.name)?;
    match test.status {
        TestStatus::Passed | TestStatus::Failed => write!(out, " ({}ms", test.duration_ms)?,
        TestStatus::Skipped | TestStatus::Todo => return writeln!(out),
    }
    if test.retries > 0 {
        let noun = if test.retries == 1 { "retry" } else { "retries" };
        write!(out, ", {} {noun}", test.retries)?;
    }
    if test.error.as_ref().is_some_and(|error| error.timeout) {
        write!(out, ", timed out")?;
    }
    writeln!(out, ")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{ResultCollector, RunMetadata};
    use crate::runner::{RunResults, RunSummary, StatusCounts, SuiteRunResult, TestError};

    fn result(name: &str, status: TestStatus, retries: u32, error: Option<TestError>) -> TestRunResult {
        TestRunResult {
            name: name.into(),
            slug: format!("users.{name}"),
            suite: "Users".into(),
            description: None,
            status,
            duration_ms: 7,
            retries,
            error,
            violations: Vec::new(),
            findings: Vec::new(),
            tags: Vec::new(),
            endpoint: None,
            method: None,
            file: None,
        }
    }

    fn report() -> RunReport {
        let tests = vec![
            result("lists", TestStatus::Passed, 1, None),
            result(
                "creates",
                TestStatus::Failed,
                2,
                Some(TestError::from_error(&anyhow::anyhow!("expected 201").context("POST /users"))),
            ),
            result("deletes", TestStatus::Todo, 0, None),
        ];
        let counts = StatusCounts::from_tests(&tests);
        let suite = SuiteRunResult {
            name: "Users".into(),
            prefix: None,
            tests,
            counts,
            errors: Vec::new(),
            duration_ms: 20,
            started_at_ms: 0,
            finished_at_ms: 20,
        };
        let summary = RunSummary::from_suites(std::slice::from_ref(&suite), 0, 20, 20);
        let mut collector = ResultCollector::new(RunMetadata {
            tool_version: "0.1.0".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            cpu_count: 8,
            environment: Some("staging".into()),
            ..RunMetadata::default()
        });
        collector.add_results(RunResults {
            suites: vec![suite],
            summary,
        });
        collector.get_results()
    }

    #[test]
    fn renders_suites_failures_and_summary() {
        let mut out = Vec::new();
        write_console_report(&mut out, &report(), &[]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("apiwarden 0.1.0 (linux/x86_64, env staging)\n"));
        assert!(text.contains("  PASS lists (7ms, 1 retry)\n"));
        assert!(text.contains("  FAIL creates (7ms, 2 retries)\n"));
        assert!(text.contains("  TODO deletes\n"));
        assert!(text.contains("  1) Users > creates\n     POST /users: expected 201\n"));
        assert!(text.contains("Tests: 3 total, 1 passed, 1 failed, 0 skipped, 1 todo (20ms)"));
        assert!(!text.contains("Governance:"));
        assert!(!text.contains("Deleted tests:"));
    }

    #[test]
    fn lists_deleted_tests() {
        let deleted = PersistedTest {
            id: 3,
            test_hash: "abc".into(),
            test_slug: "users.legacy".into(),
            current_name: "legacy".into(),
            current_description: None,
            suite_name: "Users".into(),
            test_file: None,
            endpoint: None,
            http_method: None,
            first_seen_at: 1,
            last_seen_at: 5,
            deleted_at: Some(9),
            total_runs: 2,
        };
        let mut out = Vec::new();
        write_console_report(&mut out, &report(), &[deleted]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("Deleted tests:\n  users.legacy (Users, last seen 5)\n"));
    }
}
