//! # Test Runner
//!
//! Walks the registry in order and executes every suite sequentially:
//!
//! 1. `beforeAll` hooks (a failure is recorded on the suite and its tests are
//!    reported as skipped)
//! 2. each selected test, attempt by attempt: `beforeEach` → body raced
//!    against its timeout → `afterEach` (always attempted)
//! 3. `afterAll` hooks, regardless of test outcomes
//!
//! Individual failures never abort the run; `bail` stops the current suite
//! after a failed test and the run after a failed suite.

mod context;
mod result;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use context::TestContext;
pub use result::{
    HookPhase, RunResults, RunSummary, StatusCounts, SuiteHookError, SuiteRunResult, TestError, TestRunResult,
    TestStatus,
};

use crate::clock::now_ms;
use crate::config::RunnerConfig;
use crate::http::{Exchange, ExchangeClient};
use crate::inspection::{GovernanceEngine, InspectionContext, SecurityScanner};
use crate::registry::{Registry, TestDefinition, TestFn, TestSuiteDefinition};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

pub struct TestRunner {
    config: RunnerConfig,
    client: ExchangeClient,
    governance: Option<GovernanceEngine>,
    security: Option<SecurityScanner>,
    variables: Arc<BTreeMap<String, String>>,
}

impl TestRunner {
    pub fn new(config: RunnerConfig, client: ExchangeClient) -> Self {
        Self {
            config,
            client,
            governance: None,
            security: None,
            variables: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_governance(mut self, engine: GovernanceEngine) -> Self {
        self.governance = Some(engine);
        self
    }

    pub fn with_security(mut self, scanner: SecurityScanner) -> Self {
        self.security = Some(scanner);
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    /// Execute every suite in registration order.
    pub async fn run(&self, registry: &Registry) -> RunResults {
        let started_at_ms = now_ms();
        let started = Instant::now();
        let has_only = registry.has_only();

        if self.config.parallel {
            tracing::warn!(
                target: "apiwarden.runner",
                "parallel execution is not supported; suites and tests run sequentially"
            );
        }

        tracing::info!(
            target: "apiwarden.runner",
            suites = registry.suites().len(),
            tests = registry.test_count(),
            only_mode = has_only,
            "run started"
        );

        let mut suites = Vec::with_capacity(registry.suites().len());
        for suite in registry.suites() {
            let result = self.run_suite(suite, has_only).await;
            let failed = result.has_failures();
            suites.push(result);

            if failed && self.config.bail {
                tracing::info!(
                    target: "apiwarden.runner",
                    suite = %suite.name,
                    "bail: skipping remaining suites after failure"
                );
                break;
            }
        }

        let summary = RunSummary::from_suites(&suites, started_at_ms, now_ms(), elapsed_ms(started));
        tracing::info!(
            target: "apiwarden.runner",
            total = summary.counts.total,
            passed = summary.counts.passed,
            failed = summary.counts.failed,
            skipped = summary.counts.skipped,
            todo = summary.counts.todo,
            duration_ms = summary.duration_ms,
            "run finished"
        );

        RunResults { suites, summary }
    }

    /// Run one suite. When `has_only` is set, only this suite's `only` tests
    /// run, which may be none of them.
    pub async fn run_suite(&self, suite: &TestSuiteDefinition, has_only: bool) -> SuiteRunResult {
        let started_at_ms = now_ms();
        let started = Instant::now();
        let hook_ctx = TestContext::for_suite(suite, self.client.fork(), self.variables.clone());
        let mut errors = Vec::new();

        tracing::debug!(target: "apiwarden.runner", suite = %suite.name, "suite started");

        let before_all_ok = match run_hooks(&suite.before_all, &hook_ctx).await {
            Ok(()) => true,
            Err(err) => {
                errors.push(suite_error(HookPhase::BeforeAll, err, &suite.name));
                false
            }
        };

        let selected = suite.tests.iter().filter(|test| !has_only || test.only);
        let mut tests = Vec::new();
        for test in selected {
            if !before_all_ok {
                tests.push(TestRunResult::pending(suite, test).with_status(TestStatus::Skipped));
                continue;
            }

            let result = self.run_test(suite, test).await;
            let failed = result.status == TestStatus::Failed;
            tests.push(result);

            if failed && self.config.bail {
                tracing::info!(
                    target: "apiwarden.runner",
                    suite = %suite.name,
                    test = %test.name,
                    "bail: skipping remaining tests in suite"
                );
                break;
            }
        }

        if let Err(err) = run_hooks(&suite.after_all, &hook_ctx).await {
            errors.push(suite_error(HookPhase::AfterAll, err, &suite.name));
        }

        let counts = StatusCounts::from_tests(&tests);
        tracing::debug!(
            target: "apiwarden.runner",
            suite = %suite.name,
            passed = counts.passed,
            failed = counts.failed,
            hook_errors = errors.len(),
            "suite finished"
        );

        SuiteRunResult {
            name: suite.name.clone(),
            prefix: suite.prefix.clone(),
            tests,
            counts,
            errors,
            duration_ms: elapsed_ms(started),
            started_at_ms,
            finished_at_ms: now_ms(),
        }
    }

    pub async fn run_test(&self, suite: &TestSuiteDefinition, test: &TestDefinition) -> TestRunResult {
        let mut result = TestRunResult::pending(suite, test);

        let Some(body) = test.body.as_ref().filter(|_| !test.stub) else {
            return result.with_status(TestStatus::Todo);
        };
        if test.skip {
            return result.with_status(TestStatus::Skipped);
        }

        let max_retries = test.retries.or(self.config.retries).unwrap_or(0);
        let timeout = test
            .timeout
            .or(self.config.timeout_ms.map(Duration::from_millis))
            .unwrap_or(DEFAULT_TIMEOUT);
        let client = self.client.fork();
        let started = Instant::now();
        let mut last_error = None;
        let mut passed_exchange = None;
        let mut passed = false;

        for attempt in 0..=max_retries {
            let ctx = TestContext::for_attempt(suite, test, attempt, client.clone(), self.variables.clone());

            let mut error = match run_hooks(&suite.before_each, &ctx).await {
                Ok(()) => settle(body, ctx.clone(), Some(timeout)).await.err(),
                Err(err) => Some(err.in_hook("beforeEach")),
            };
            let exchange = client.last_exchange();

            if let Err(after) = run_hooks(&suite.after_each, &ctx).await {
                error = Some(match error {
                    Some(existing) => existing.append(after, "afterEach"),
                    None => after.in_hook("afterEach"),
                });
            }

            match error {
                None => {
                    result.retries = attempt;
                    passed_exchange = exchange;
                    passed = true;
                    break;
                }
                Some(err) => {
                    tracing::debug!(
                        target: "apiwarden.runner",
                        suite = %suite.name,
                        test = %test.name,
                        attempt,
                        max_retries,
                        timeout = err.timeout,
                        error = %err.message,
                        "attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        if passed {
            result.status = TestStatus::Passed;
            self.inspect(&mut result, test, passed_exchange.as_ref()).await;
        } else {
            result.status = TestStatus::Failed;
            result.retries = max_retries;
            result.error = last_error;
        }
        result.duration_ms = elapsed_ms(started);

        tracing::debug!(
            target: "apiwarden.runner",
            suite = %suite.name,
            test = %test.name,
            slug = %test.slug,
            status = %result.status,
            retries = result.retries,
            duration_ms = result.duration_ms,
            "test finished"
        );

        result
    }

    async fn inspect(&self, result: &mut TestRunResult, test: &TestDefinition, exchange: Option<&Exchange>) {
        let Some(exchange) = exchange else {
            return;
        };
        let context = InspectionContext::for_exchange(
            &result.suite,
            &result.name,
            &result.slug,
            test.endpoint.as_deref(),
            test.method,
            exchange,
        );

        if let Some(engine) = self.governance.as_ref().filter(|engine| engine.is_enabled()) {
            result.violations = engine.evaluate(Some(exchange), &context).await;
        }
        if let Some(scanner) = self.security.as_ref().filter(|scanner| scanner.is_enabled()) {
            result.findings = scanner.scan(Some(exchange), &context).await;
        }
    }
}

/// Run hooks in order, stopping at the first failure.
async fn run_hooks(hooks: &[TestFn], ctx: &TestContext) -> Result<(), TestError> {
    for hook in hooks {
        settle(hook, ctx.clone(), None).await?;
    }
    Ok(())
}

/// Drive a body or hook to completion on its own task.
///
/// With a limit, the task races a timer. Whichever side loses is dropped: a
/// dropped timer is cleared, and a dropped `JoinHandle` detaches the task
/// without cancelling it.
async fn settle(f: &TestFn, ctx: TestContext, limit: Option<Duration>) -> Result<(), TestError> {
    let handle = tokio::spawn(f(ctx));

    let joined = match limit {
        None => handle.await,
        Some(limit) => tokio::select! {
            joined = handle => joined,
            () = tokio::time::sleep(limit) => return Err(TestError::timed_out(limit)),
        },
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(TestError::from_error(&err)),
        Err(join_err) if join_err.is_panic() => Err(TestError::from_panic(join_err.into_panic())),
        Err(join_err) => Err(TestError {
            message: format!("task did not complete: {join_err}"),
            stack: None,
            timeout: false,
        }),
    }
}

fn suite_error(phase: HookPhase, err: TestError, suite: &str) -> SuiteHookError {
    tracing::warn!(
        target: "apiwarden.runner",
        suite,
        %phase,
        error = %err.message,
        "suite hook failed"
    );
    SuiteHookError {
        phase,
        message: err.message,
        stack: err.stack,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::{HttpConfig, InspectionConfig};
    use crate::inspection::fixtures;
    use crate::registry::BodyResult;

    fn runner(config: RunnerConfig) -> TestRunner {
        let client = ExchangeClient::from_config(&HttpConfig::default()).unwrap();
        TestRunner::new(config, client)
    }

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    fn bump(counter: &Arc<AtomicU32>) -> impl Fn(TestContext) -> futures::future::Ready<BodyResult> + Send + Sync + 'static {
        let counter = counter.clone();
        move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failing_test_runs_every_attempt_with_hooks() {
        let before = counter();
        let after = counter();
        let attempts = counter();

        let mut registry = Registry::new();
        let seen = attempts.clone();
        registry
            .describe("Flaky", |suite| {
                suite.before_each(bump(&before));
                suite.after_each(bump(&after));
                suite
                    .test("always fails", move |_ctx| {
                        let seen = seen.clone();
                        async move {
                            seen.fetch_add(1, Ordering::SeqCst);
                            anyhow::bail!("expected 200, got 503")
                        }
                    })
                    .retries(2);
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let test = &results.suites[0].tests[0];

        assert_eq!(test.status, TestStatus::Failed);
        assert_eq!(test.retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(before.load(Ordering::SeqCst), 3);
        assert_eq!(after.load(Ordering::SeqCst), 3);
        assert_eq!(test.error.as_ref().unwrap().message, "expected 200, got 503");
    }

    #[tokio::test]
    async fn passing_on_third_attempt_reports_two_retries() {
        let before = counter();
        let after = counter();
        let attempts = counter();

        let mut registry = Registry::new();
        let seen = attempts.clone();
        registry
            .describe("Flaky", |suite| {
                suite.before_each(bump(&before));
                suite.after_each(bump(&after));
                suite
                    .test("eventually passes", move |ctx| {
                        let seen = seen.clone();
                        async move {
                            seen.fetch_add(1, Ordering::SeqCst);
                            anyhow::ensure!(ctx.attempt >= 2, "not yet (attempt {})", ctx.attempt);
                            Ok(())
                        }
                    })
                    .retries(3);
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let test = &results.suites[0].tests[0];

        assert_eq!(test.status, TestStatus::Passed);
        assert_eq!(test.retries, 2);
        assert!(test.error.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(before.load(Ordering::SeqCst), 3);
        assert_eq!(after.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn config_retries_apply_when_test_has_none() {
        let attempts = counter();
        let mut registry = Registry::new();
        registry
            .describe("Defaults", |suite| {
                let seen = attempts.clone();
                suite.test("fails", move |_ctx| {
                    let seen = seen.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("nope")
                    }
                });
            })
            .unwrap();

        let config = RunnerConfig {
            retries: Some(1),
            ..RunnerConfig::default()
        };
        let results = runner(config).run(&registry).await;
        assert_eq!(results.suites[0].tests[0].retries, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn todo_and_skip_run_no_hooks() {
        let before = counter();
        let after = counter();

        let mut registry = Registry::new();
        registry
            .describe("Pending", |suite| {
                suite.before_each(bump(&before));
                suite.after_each(bump(&after));
                suite.todo("write me");
                suite.test("stubbed", |_ctx| async { Ok(()) }).stub();
                suite.test("skipped", |_ctx| async { anyhow::bail!("must not run") }).skip();
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let statuses: Vec<TestStatus> = results.tests().map(|test| test.status).collect();

        assert_eq!(statuses, vec![TestStatus::Todo, TestStatus::Todo, TestStatus::Skipped]);
        assert!(results.tests().all(|test| test.duration_ms == 0 && test.error.is_none()));
        assert_eq!(before.load(Ordering::SeqCst), 0);
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(results.summary.counts.todo, 2);
        assert_eq!(results.summary.counts.skipped, 1);
    }

    #[tokio::test]
    async fn only_tests_narrow_the_whole_run() {
        let hooks = counter();
        let mut registry = Registry::new();
        registry
            .describe("First", |suite| {
                suite.test("ignored", |_ctx| async { Ok(()) });
                suite.test("focused", |_ctx| async { Ok(()) }).only();
            })
            .unwrap();
        registry
            .describe("Second", |suite| {
                suite.before_all(bump(&hooks));
                suite.test("also ignored", |_ctx| async { Ok(()) });
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let names: Vec<&str> = results.tests().map(|test| test.name.as_str()).collect();

        assert_eq!(names, vec!["focused"]);
        assert_eq!(results.suites.len(), 2);
        assert!(results.suites[1].tests.is_empty());
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_bodies_time_out() {
        let mut registry = Registry::new();
        registry
            .describe("Slow", |suite| {
                suite
                    .test("hangs", |_ctx| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(())
                    })
                    .timeout(Duration::from_millis(20));
                suite.test("quick", |_ctx| async { Ok(()) });
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let hung = &results.suites[0].tests[0];

        assert_eq!(hung.status, TestStatus::Failed);
        let error = hung.error.as_ref().unwrap();
        assert!(error.timeout);
        assert_eq!(error.message, "test timed out after 20ms");
        assert_eq!(results.suites[0].tests[1].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn timed_out_attempt_is_retried() {
        let before = counter();
        let after = counter();

        let mut registry = Registry::new();
        registry
            .describe("Slow", |suite| {
                suite.before_each(bump(&before));
                suite.after_each(bump(&after));
                suite
                    .test("slow first", |ctx| async move {
                        if ctx.attempt == 0 {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        Ok(())
                    })
                    .timeout(Duration::from_millis(20))
                    .retries(1);
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let test = &results.suites[0].tests[0];

        assert_eq!(test.status, TestStatus::Passed);
        assert_eq!(test.retries, 1);
        assert!(test.error.is_none());
        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_on_every_attempt_keeps_the_flag() {
        let attempts = counter();
        let mut registry = Registry::new();
        registry
            .describe("Slow", |suite| {
                let seen = attempts.clone();
                suite
                    .test("always hangs", move |_ctx| {
                        let seen = seen.clone();
                        async move {
                            seen.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_secs(30)).await;
                            Ok(())
                        }
                    })
                    .timeout(Duration::from_millis(20))
                    .retries(2);
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let test = &results.suites[0].tests[0];

        assert_eq!(test.status, TestStatus::Failed);
        assert_eq!(test.retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let error = test.error.as_ref().unwrap();
        assert!(error.timeout);
        assert_eq!(error.message, "test timed out after 20ms");
    }

    #[tokio::test]
    async fn config_timeout_applies_when_test_has_none() {
        let mut registry = Registry::new();
        registry
            .describe("Defaults", |suite| {
                suite.test("hangs", |_ctx| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                });
            })
            .unwrap();

        let config = RunnerConfig {
            timeout_ms: Some(20),
            ..RunnerConfig::default()
        };
        let results = runner(config).run(&registry).await;
        let test = &results.suites[0].tests[0];

        assert_eq!(test.status, TestStatus::Failed);
        let error = test.error.as_ref().unwrap();
        assert!(error.timeout);
        assert_eq!(error.message, "test timed out after 20ms");
    }

    #[tokio::test]
    async fn panics_fail_the_attempt() {
        let mut registry = Registry::new();
        registry
            .describe("Panics", |suite| {
                suite.test("explodes", |_ctx| async {
                    if std::hint::black_box(true) {
                        panic!("index out of bounds");
                    }
                    Ok(())
                });
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let test = &results.suites[0].tests[0];
        assert_eq!(test.status, TestStatus::Failed);
        assert_eq!(test.error.as_ref().unwrap().message, "panicked: index out of bounds");
    }

    #[tokio::test]
    async fn after_each_errors_are_appended() {
        let mut registry = Registry::new();
        registry
            .describe("Cleanup", |suite| {
                suite.after_each(|_ctx| async { anyhow::bail!("could not delete fixture") });
                suite.test("fails first", |_ctx| async { anyhow::bail!("assertion failed") });
                suite.test("passes body", |_ctx| async { Ok(()) });
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let tests = &results.suites[0].tests;

        assert_eq!(
            tests[0].error.as_ref().unwrap().message,
            "assertion failed\nafterEach hook failed: could not delete fixture"
        );
        assert_eq!(tests[1].status, TestStatus::Failed);
        assert_eq!(
            tests[1].error.as_ref().unwrap().message,
            "afterEach hook failed: could not delete fixture"
        );
    }

    #[tokio::test]
    async fn before_each_failure_skips_body_but_not_after_each() {
        let body = counter();
        let after = counter();
        let mut registry = Registry::new();
        registry
            .describe("Setup", |suite| {
                suite.before_each(|_ctx| async { anyhow::bail!("token expired") });
                suite.after_each(bump(&after));
                suite.test("never reached", bump(&body));
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;
        let test = &results.suites[0].tests[0];
        assert_eq!(test.error.as_ref().unwrap().message, "beforeEach hook failed: token expired");
        assert_eq!(body.load(Ordering::SeqCst), 0);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bail_stops_after_first_failure() {
        let mut registry = Registry::new();
        registry
            .describe("First", |suite| {
                suite.test("fails", |_ctx| async { anyhow::bail!("boom") });
                suite.test("never runs", |_ctx| async { Ok(()) });
            })
            .unwrap();
        registry
            .describe("Second", |suite| {
                suite.test("never runs either", |_ctx| async { Ok(()) });
            })
            .unwrap();

        let config = RunnerConfig {
            bail: true,
            ..RunnerConfig::default()
        };
        let results = runner(config).run(&registry).await;

        assert_eq!(results.suites.len(), 1);
        assert_eq!(results.suites[0].tests.len(), 1);
        assert_eq!(results.summary.counts.total, 1);
        assert_eq!(results.summary.counts.failed, 1);
    }

    #[tokio::test]
    async fn suite_hook_failures_are_attributed_to_the_suite() {
        let after_all = counter();
        let mut registry = Registry::new();
        registry
            .describe("Broken setup", |suite| {
                suite.before_all(|_ctx| async { anyhow::bail!("database unreachable") });
                suite.after_all(bump(&after_all));
                suite.test("a", |_ctx| async { Ok(()) });
                suite.test("b", |_ctx| async { Ok(()) });
            })
            .unwrap();
        registry
            .describe("Broken teardown", |suite| {
                suite.after_all(|_ctx| async { anyhow::bail!("leaked fixtures") });
                suite.test("c", |_ctx| async { Ok(()) });
            })
            .unwrap();

        let results = runner(RunnerConfig::default()).run(&registry).await;

        let setup = &results.suites[0];
        assert_eq!(setup.errors.len(), 1);
        assert_eq!(setup.errors[0].phase, HookPhase::BeforeAll);
        assert_eq!(setup.errors[0].message, "database unreachable");
        assert!(setup.tests.iter().all(|test| test.status == TestStatus::Skipped));
        assert_eq!(after_all.load(Ordering::SeqCst), 1);

        let teardown = &results.suites[1];
        assert_eq!(teardown.tests[0].status, TestStatus::Passed);
        assert_eq!(teardown.errors[0].phase, HookPhase::AfterAll);
        assert!(teardown.has_failures());
        assert_eq!(results.summary.suite_errors, 2);
    }

    fn registry_with_recorded_exchange() -> Registry {
        let mut registry = Registry::new();
        registry
            .describe("Users", |suite| {
                suite.test("lists users", |ctx| async move {
                    ctx.client.record(fixtures::exchange(
                        "http://api.example.com/users",
                        500,
                        &[("content-type", "text/plain")],
                        "oops",
                    ));
                    Ok(())
                });
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn inspection_is_opt_in() {
        let registry = registry_with_recorded_exchange();
        let disabled = InspectionConfig::default();
        let results = runner(RunnerConfig::default())
            .with_governance(GovernanceEngine::from_config(&disabled))
            .with_security(SecurityScanner::from_config(&disabled))
            .run(&registry)
            .await;

        let test = &results.suites[0].tests[0];
        assert_eq!(test.status, TestStatus::Passed);
        assert!(test.violations.is_empty());
        assert!(test.findings.is_empty());
    }

    #[tokio::test]
    async fn enabled_inspection_attaches_results_to_the_test() {
        let registry = registry_with_recorded_exchange();
        let enabled = InspectionConfig::enabled();
        let results = runner(RunnerConfig::default())
            .with_governance(GovernanceEngine::from_config(&enabled))
            .with_security(SecurityScanner::from_config(&enabled))
            .run(&registry)
            .await;

        let test = &results.suites[0].tests[0];
        let rules: Vec<&str> = test.violations.iter().map(|v| v.rule.as_str()).collect();
        assert!(rules.contains(&"versioned-path"));
        assert!(rules.contains(&"error-format"));
        assert!(test.violations.iter().all(|v| v.suite == "Users" && v.test == "lists users"));
        assert!(test.violations.iter().all(|v| v.slug == test.slug));
        assert!(test.findings.iter().any(|f| f.check == "insecure-transport"));
        assert!(test.findings.iter().all(|f| f.slug == test.slug));
    }

    #[tokio::test]
    async fn tests_without_requests_are_not_inspected() {
        let mut registry = Registry::new();
        registry
            .describe("Pure", |suite| {
                suite.test("no http", |_ctx| async { Ok(()) });
            })
            .unwrap();
        let enabled = InspectionConfig::enabled();
        let results = runner(RunnerConfig::default())
            .with_governance(GovernanceEngine::from_config(&enabled))
            .run(&registry)
            .await;
        assert!(results.suites[0].tests[0].violations.is_empty());
    }
}
