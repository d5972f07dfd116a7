//! Wires one run end to end: config → exchange client → inspection engines →
//! runner → collector → identity repository.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collector::{ResultCollector, RunMetadata, RunReport};
use crate::config::{Config, HttpConfig};
use crate::environment::EnvironmentManager;
use crate::error::HarnessError;
use crate::http::ExchangeClient;
use crate::inspection::{GovernanceEngine, SecurityScanner};
use crate::registry::Registry;
use crate::reporting::{PersistenceOutcome, PersistenceReporter};
use crate::runner::TestRunner;
use crate::store::{PersistedTest, TestRepository};

#[derive(Debug, Clone)]
pub struct HarnessOutcome {
    pub report: RunReport,
    /// `None` when persistence is disabled.
    pub persistence: Option<PersistenceOutcome>,
}

impl HarnessOutcome {
    /// Any failed test or suite hook.
    pub fn has_failures(&self) -> bool {
        self.report.summary.counts.failed > 0 || self.report.summary.suite_errors > 0
    }

    pub fn deleted_tests(&self) -> &[PersistedTest] {
        self.persistence
            .as_ref()
            .map(|outcome| outcome.recently_deleted.as_slice())
            .unwrap_or_default()
    }
}

pub struct Harness {
    config: Config,
    repository: Option<Arc<TestRepository>>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            repository: None,
        }
    }

    /// Use this repository instead of opening `[database].path`.
    pub fn with_repository(mut self, repository: Arc<TestRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn environment(&self) -> Result<EnvironmentManager, HarnessError> {
        Ok(EnvironmentManager::from_config(&self.config)?)
    }

    pub async fn run(&self, registry: &Registry) -> Result<HarnessOutcome, HarnessError> {
        let environment = self.environment()?;
        let variables = environment.resolve(&BTreeMap::new());

        let http = HttpConfig {
            base_url: self
                .config
                .http
                .base_url
                .as_deref()
                .map(|url| environment.interpolate(url, &variables)),
            ..self.config.http.clone()
        };
        let client = ExchangeClient::from_config(&http)?;

        let persistence = self.persistence()?;
        let env_name = self.config.active_environment.as_deref();
        let run_id = persistence
            .as_ref()
            .map(|reporter| reporter.begin(env_name, http.base_url.as_deref()))
            .transpose()?;

        let runner = TestRunner::new(self.config.runner.clone(), client)
            .with_governance(GovernanceEngine::from_config(&self.config.governance))
            .with_security(SecurityScanner::from_config(&self.config.security))
            .with_variables(variables);

        let mut collector = ResultCollector::new(RunMetadata::collect(
            self.config.active_environment.clone(),
            http.base_url.clone(),
        ));
        collector.start();
        let results = runner.run(registry).await;
        collector.add_results(results);
        collector.add_inspection_results();
        collector.end();
        let report = collector.get_results();

        let persistence = match (persistence, run_id) {
            (Some(reporter), Some(run_id)) => Some(reporter.complete(run_id, &report, registry)?),
            _ => None,
        };

        Ok(HarnessOutcome { report, persistence })
    }

    fn persistence(&self) -> Result<Option<PersistenceReporter>, HarnessError> {
        if let Some(repository) = &self.repository {
            return Ok(Some(PersistenceReporter::new(repository.clone())));
        }
        if !self.config.database.enabled {
            tracing::debug!(target: "apiwarden.store", "persistence disabled");
            return Ok(None);
        }
        let repository = TestRepository::open(&self.config.database.path)?;
        Ok(Some(PersistenceReporter::new(Arc::new(repository))))
    }
}
