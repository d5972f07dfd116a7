//! # Result Collector
//!
//! Gathers one run's suite tree, summary, governance violations, and security
//! findings into the [`RunReport`] handed to reporters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::now_ms;
use crate::inspection::{GovernanceSeverity, GovernanceViolation, SecurityFinding};
use crate::runner::{RunResults, RunSummary, SuiteRunResult, TestRunResult, TestStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceReport {
    /// Error-severity violations.
    pub violations: Vec<GovernanceViolation>,
    /// Everything below error severity.
    pub warnings: Vec<GovernanceViolation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub findings: Vec<SecurityFinding>,
}

/// Where and with what the run happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub tool_version: String,
    pub os: String,
    pub arch: String,
    pub cpu_count: u32,
    pub environment: Option<String>,
    pub base_url: Option<String>,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

impl RunMetadata {
    pub fn collect(environment: Option<String>, base_url: Option<String>) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism()
                .map(|value| value.get() as u32)
                .unwrap_or(1),
            environment,
            base_url,
            started_at_ms: None,
            finished_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub suites: Vec<SuiteRunResult>,
    pub summary: RunSummary,
    pub governance: GovernanceReport,
    pub security: SecurityReport,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    start_time: Option<i64>,
    end_time: Option<i64>,
    suites: Vec<SuiteRunResult>,
    summary: RunSummary,
    governance: GovernanceReport,
    security: SecurityReport,
    metadata: RunMetadata,
}

impl ResultCollector {
    pub fn new(metadata: RunMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn start(&mut self) {
        self.start_time = Some(now_ms());
        self.end_time = None;
    }

    pub fn end(&mut self) {
        self.end_time = Some(now_ms());
    }

    /// Store the runner's output. The collector keeps its own start time when
    /// `start` was called; the runner's timestamps only fill in a missing one.
    pub fn add_results(&mut self, results: RunResults) {
        self.suites = results.suites;
        self.summary = results.summary;
        if let Some(started) = self.start_time {
            self.summary.started_at_ms = started;
        } else {
            self.start_time = Some(self.summary.started_at_ms);
        }
    }

    /// Pull per-test violations and findings into the run-level lists.
    pub fn add_inspection_results(&mut self) {
        let tests: Vec<TestRunResult> = self.tests().cloned().collect();
        for test in tests {
            for violation in test.violations {
                self.add_governance_violation(violation);
            }
            for finding in test.findings {
                self.add_security_finding(finding);
            }
        }
    }

    pub fn add_governance_violation(&mut self, violation: GovernanceViolation) {
        if violation.severity == GovernanceSeverity::Error {
            self.governance.violations.push(violation);
        } else {
            self.governance.warnings.push(violation);
        }
    }

    pub fn add_security_finding(&mut self, finding: SecurityFinding) {
        self.security.findings.push(finding);
    }

    pub fn get_results(&self) -> RunReport {
        let mut metadata = self.metadata.clone();
        metadata.started_at_ms = self.start_time;
        metadata.finished_at_ms = self.end_time.or(Some(self.summary.finished_at_ms).filter(|ts| *ts > 0));

        RunReport {
            suites: self.suites.clone(),
            summary: self.summary.clone(),
            governance: self.governance.clone(),
            security: self.security.clone(),
            metadata,
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestRunResult> {
        self.suites.iter().flat_map(|suite| suite.tests.iter())
    }

    /// Any failed test or any suite-level hook error.
    pub fn has_failures(&self) -> bool {
        self.summary.counts.failed > 0 || self.suites.iter().any(|suite| !suite.errors.is_empty())
    }

    /// Every counted test passed and nothing failed at suite level.
    pub fn has_all_passed(&self) -> bool {
        !self.has_failures() && self.summary.counts.passed == self.summary.counts.total
    }

    /// Percentage of executed (passed or failed) tests that passed; 0 when none ran.
    pub fn get_success_rate(&self) -> f64 {
        let executed = self.summary.counts.passed + self.summary.counts.failed;
        if executed == 0 {
            return 0.0;
        }
        self.summary.counts.passed as f64 / executed as f64 * 100.0
    }

    /// The `limit` slowest executed tests, slowest first.
    pub fn get_slowest_tests(&self, limit: usize) -> Vec<&TestRunResult> {
        let mut executed: Vec<&TestRunResult> = self
            .tests()
            .filter(|test| matches!(test.status, TestStatus::Passed | TestStatus::Failed))
            .collect();
        executed.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        executed.truncate(limit);
        executed
    }

    pub fn get_tests_by_tag(&self, tag: &str) -> Vec<&TestRunResult> {
        self.tests().filter(|test| test.tags.iter().any(|t| t == tag)).collect()
    }

    /// Violation counts per severity, for summaries.
    pub fn governance_by_severity(&self) -> BTreeMap<GovernanceSeverity, usize> {
        let mut counts = BTreeMap::new();
        for violation in self.governance.violations.iter().chain(&self.governance.warnings) {
            *counts.entry(violation.severity).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::runner::{HookPhase, StatusCounts, SuiteHookError};

    fn test(name: &str, status: TestStatus, duration_ms: u64, tags: &[&str]) -> TestRunResult {
        TestRunResult {
            name: name.into(),
            slug: format!("users.{name}"),
            suite: "Users".into(),
            description: None,
            status,
            duration_ms,
            retries: 0,
            error: None,
            violations: Vec::new(),
            findings: Vec::new(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            endpoint: None,
            method: None,
            file: None,
        }
    }

    fn results(tests: Vec<TestRunResult>, errors: Vec<SuiteHookError>) -> RunResults {
        let counts = StatusCounts::from_tests(&tests);
        let suite = SuiteRunResult {
            name: "Users".into(),
            prefix: None,
            tests,
            counts,
            errors,
            duration_ms: 40,
            started_at_ms: 1_000,
            finished_at_ms: 1_040,
        };
        let summary = RunSummary::from_suites(std::slice::from_ref(&suite), 1_000, 1_040, 40);
        RunResults {
            suites: vec![suite],
            summary,
        }
    }

    fn violation(severity: GovernanceSeverity) -> GovernanceViolation {
        GovernanceViolation {
            rule: "versioned-path".into(),
            category: "versioning".into(),
            severity,
            message: "no version".into(),
            location: None,
            remediation: None,
            endpoint: "/users".into(),
            method: HttpMethod::Get,
            suite: "Users".into(),
            test: "lists".into(),
            slug: "users.lists".into(),
        }
    }

    #[test]
    fn keeps_its_own_start_time() {
        let mut collector = ResultCollector::default();
        collector.start();
        let started = collector.start_time.unwrap();
        collector.add_results(results(vec![test("a", TestStatus::Passed, 5, &[])], Vec::new()));
        collector.end();

        let report = collector.get_results();
        assert_eq!(report.metadata.started_at_ms, Some(started));
        assert_eq!(report.summary.started_at_ms, started);
        assert!(report.metadata.finished_at_ms.unwrap() >= started);
    }

    #[test]
    fn routes_violations_by_severity() {
        let mut collector = ResultCollector::default();
        collector.add_governance_violation(violation(GovernanceSeverity::Error));
        collector.add_governance_violation(violation(GovernanceSeverity::Warning));
        collector.add_governance_violation(violation(GovernanceSeverity::Info));

        let report = collector.get_results();
        assert_eq!(report.governance.violations.len(), 1);
        assert_eq!(report.governance.warnings.len(), 2);
        assert_eq!(collector.governance_by_severity()[&GovernanceSeverity::Info], 1);
    }

    #[test]
    fn derived_queries() {
        let mut collector = ResultCollector::default();
        collector.add_results(results(
            vec![
                test("fast", TestStatus::Passed, 5, &["smoke"]),
                test("slow", TestStatus::Failed, 90, &["smoke", "slow"]),
                test("mid", TestStatus::Passed, 30, &[]),
                test("later", TestStatus::Todo, 0, &["smoke"]),
            ],
            Vec::new(),
        ));

        assert!(collector.has_failures());
        assert!(!collector.has_all_passed());
        assert!((collector.get_success_rate() - 66.666).abs() < 0.01);

        let slowest: Vec<&str> = collector.get_slowest_tests(2).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(slowest, vec!["slow", "mid"]);

        let smoke: Vec<&str> = collector.get_tests_by_tag("smoke").iter().map(|t| t.name.as_str()).collect();
        assert_eq!(smoke, vec!["fast", "slow", "later"]);
    }

    #[test]
    fn suite_hook_errors_count_as_failures() {
        let mut collector = ResultCollector::default();
        collector.add_results(results(
            vec![test("a", TestStatus::Passed, 1, &[])],
            vec![SuiteHookError {
                phase: HookPhase::AfterAll,
                message: "teardown failed".into(),
                stack: None,
            }],
        ));
        assert!(collector.has_failures());
        assert!(!collector.has_all_passed());
        assert_eq!(collector.get_success_rate(), 100.0);
    }

    #[test]
    fn empty_runs() {
        let collector = ResultCollector::default();
        assert!(!collector.has_failures());
        assert!(collector.has_all_passed());
        assert_eq!(collector.get_success_rate(), 0.0);
        assert!(collector.get_slowest_tests(5).is_empty());
    }

    #[test]
    fn lifts_inspection_results_from_tests() {
        let mut passed = test("a", TestStatus::Passed, 1, &[]);
        passed.violations.push(violation(GovernanceSeverity::Error));
        passed.violations.push(violation(GovernanceSeverity::Warning));

        let mut collector = ResultCollector::default();
        collector.add_results(results(vec![passed], Vec::new()));
        collector.add_inspection_results();

        let report = collector.get_results();
        assert_eq!(report.governance.violations.len(), 1);
        assert_eq!(report.governance.warnings.len(), 1);
        assert!(report.security.findings.is_empty());
    }
}
