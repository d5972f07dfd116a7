use std::collections::HashMap;
use std::sync::Arc;

use crate::collector::RunReport;
use crate::error::PersistenceError;
use crate::registry::Registry;
use crate::store::{DEFAULT_DELETED_LIMIT, ObservationOutcome, PersistedTest, TestDescriptor, TestRepository};

/// What one run changed in the identity store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceOutcome {
    pub run_id: i64,
    /// Distinct test identities seen this run.
    pub observed: usize,
    pub created: Vec<String>,
    pub resurrected: Vec<String>,
    /// Tests this run soft-deleted.
    pub newly_deleted: Vec<PersistedTest>,
    /// Most recent deletions across all runs, for reporting.
    pub recently_deleted: Vec<PersistedTest>,
}

/// Drives the repository once per run: open the run before tests execute,
/// then record every observed test, detect deletions, and close the run.
pub struct PersistenceReporter {
    repository: Arc<TestRepository>,
    deleted_limit: usize,
}

impl PersistenceReporter {
    pub fn new(repository: Arc<TestRepository>) -> Self {
        Self {
            repository,
            deleted_limit: DEFAULT_DELETED_LIMIT,
        }
    }

    pub fn with_deleted_limit(mut self, limit: usize) -> Self {
        self.deleted_limit = limit;
        self
    }

    pub fn repository(&self) -> &TestRepository {
        &self.repository
    }

    pub fn begin(&self, environment: Option<&str>, base_url: Option<&str>) -> Result<i64, PersistenceError> {
        self.repository.start_run(environment, base_url)
    }

    /// Persist a finished run.
    ///
    /// Only suites present in the report count as executed. Every test the
    /// registry still defines for those suites counts as current, so tests
    /// filtered out by `only` or cut short by `bail` are not mistaken for
    /// deleted ones.
    pub fn complete(
        &self,
        run_id: i64,
        report: &RunReport,
        registry: &Registry,
    ) -> Result<PersistenceOutcome, PersistenceError> {
        let mut outcome = PersistenceOutcome {
            run_id,
            ..PersistenceOutcome::default()
        };
        let mut test_ids: HashMap<&str, i64> = HashMap::new();

        for suite in &report.suites {
            for result in &suite.tests {
                // A slug shared by several tests is one identity, observed once per run.
                let test_id = match test_ids.get(result.slug.as_str()) {
                    Some(&test_id) => test_id,
                    None => {
                        let observed = self.repository.find_or_create_test(&TestDescriptor::from(result))?;
                        match observed.outcome {
                            ObservationOutcome::Created => outcome.created.push(observed.test.test_slug.clone()),
                            ObservationOutcome::Resurrected => {
                                outcome.resurrected.push(observed.test.test_slug.clone())
                            }
                            ObservationOutcome::Updated => {}
                        }
                        test_ids.insert(result.slug.as_str(), observed.test.id);
                        outcome.observed += 1;
                        observed.test.id
                    }
                };
                self.repository.record_result(run_id, test_id, result)?;
            }
        }

        for violation in report.governance.violations.iter().chain(&report.governance.warnings) {
            let test_id = test_ids.get(violation.slug.as_str()).copied();
            self.repository.record_violation(run_id, test_id, violation)?;
        }
        for finding in &report.security.findings {
            let test_id = test_ids.get(finding.slug.as_str()).copied();
            self.repository.record_finding(run_id, test_id, finding)?;
        }

        let executed_suites: Vec<String> = report.suites.iter().map(|suite| suite.name.clone()).collect();
        let current_slugs: Vec<String> = registry
            .suites()
            .iter()
            .filter(|suite| executed_suites.contains(&suite.name))
            .flat_map(|suite| suite.tests.iter().map(|test| test.slug.clone()))
            .collect();

        outcome.newly_deleted = self
            .repository
            .mark_deleted_tests(run_id, &current_slugs, &executed_suites)?;
        self.repository.finish_run(run_id, &report.summary)?;
        outcome.recently_deleted = self.repository.get_deleted_tests(self.deleted_limit)?;

        tracing::info!(
            target: "apiwarden.store",
            run_id,
            observed = outcome.observed,
            created = outcome.created.len(),
            resurrected = outcome.resurrected.len(),
            deleted = outcome.newly_deleted.len(),
            "run persisted"
        );
        Ok(outcome)
    }
}
