use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::HttpMethod;
use crate::inspection::{GovernanceViolation, SecurityFinding};
use crate::registry::{TestDefinition, TestSuiteDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Todo,
}

impl TestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Todo => "todo",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    /// Error with its full cause chain, when there is one.
    pub stack: Option<String>,
    /// Set when the attempt lost the race against its timer.
    pub timeout: bool,
}

impl TestError {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let chained = format!("{err:?}");
        let message = format!("{err:#}");
        Self {
            stack: (chained != message).then_some(chained),
            message,
            timeout: false,
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self {
            message: format!("test timed out after {}ms", limit.as_millis()),
            stack: None,
            timeout: true,
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|text| (*text).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self {
            message: format!("panicked: {detail}"),
            stack: None,
            timeout: false,
        }
    }

    pub fn in_hook(mut self, hook: &str) -> Self {
        self.message = format!("{hook} hook failed: {}", self.message);
        self
    }

    /// Keep this error and add a later hook failure after it.
    pub fn append(mut self, other: TestError, hook: &str) -> Self {
        self.message = format!("{}\n{hook} hook failed: {}", self.message, other.message);
        if let Some(other_stack) = other.stack {
            self.stack = Some(match self.stack {
                Some(stack) => format!("{stack}\n{other_stack}"),
                None => other_stack,
            });
        }
        self
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub name: String,
    pub slug: String,
    pub suite: String,
    pub description: Option<String>,
    pub status: TestStatus,
    pub duration_ms: u64,
    /// Retries consumed: the index of the passing attempt, or the retry budget on failure.
    pub retries: u32,
    pub error: Option<TestError>,
    pub violations: Vec<GovernanceViolation>,
    pub findings: Vec<SecurityFinding>,
    pub tags: Vec<String>,
    pub endpoint: Option<String>,
    pub method: Option<HttpMethod>,
    pub file: Option<String>,
}

impl TestRunResult {
    pub(crate) fn pending(suite: &TestSuiteDefinition, test: &TestDefinition) -> Self {
        Self {
            name: test.name.clone(),
            slug: test.slug.clone(),
            suite: suite.name.clone(),
            description: test.description.clone(),
            status: TestStatus::Skipped,
            duration_ms: 0,
            retries: 0,
            error: None,
            violations: Vec::new(),
            findings: Vec::new(),
            tags: test.tags.clone(),
            endpoint: test.endpoint.clone(),
            method: test.method,
            file: test.file.clone(),
        }
    }

    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    BeforeAll,
    AfterAll,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::BeforeAll => "beforeAll",
            HookPhase::AfterAll => "afterAll",
        })
    }
}

/// A `beforeAll`/`afterAll` failure, attributed to the suite rather than a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteHookError {
    pub phase: HookPhase,
    pub message: String,
    pub stack: Option<String>,
}

/// Per-status tallies. `total` always equals the sum of the four counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Todo => self.todo += 1,
        }
        self.total = self.passed + self.failed + self.skipped + self.todo;
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.todo += other.todo;
        self.total = self.passed + self.failed + self.skipped + self.todo;
    }

    pub fn from_tests<'a>(tests: impl IntoIterator<Item = &'a TestRunResult>) -> Self {
        let mut counts = Self::default();
        for test in tests {
            counts.record(test.status);
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteRunResult {
    pub name: String,
    pub prefix: Option<String>,
    pub tests: Vec<TestRunResult>,
    pub counts: StatusCounts,
    pub errors: Vec<SuiteHookError>,
    pub duration_ms: u64,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
}

impl SuiteRunResult {
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0 || !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub suites: usize,
    pub suite_errors: usize,
    pub duration_ms: u64,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
}

impl RunSummary {
    pub fn from_suites(suites: &[SuiteRunResult], started_at_ms: i64, finished_at_ms: i64, duration_ms: u64) -> Self {
        let mut counts = StatusCounts::default();
        for suite in suites {
            counts.merge(&suite.counts);
        }
        Self {
            counts,
            suites: suites.len(),
            suite_errors: suites.iter().map(|suite| suite.errors.len()).sum(),
            duration_ms,
            started_at_ms,
            finished_at_ms,
        }
    }
}

/// Everything a run produced. Recreated for every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub suites: Vec<SuiteRunResult>,
    pub summary: RunSummary,
}

impl RunResults {
    pub fn tests(&self) -> impl Iterator<Item = &TestRunResult> {
        self.suites.iter().flat_map(|suite| suite.tests.iter())
    }
}
