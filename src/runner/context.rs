use std::collections::BTreeMap;
use std::sync::Arc;

use crate::http::ExchangeClient;
use crate::registry::{TestDefinition, TestSuiteDefinition};

/// What a test body or hook receives.
///
/// Each test gets its own [`ExchangeClient`] handle; `beforeEach`, the body,
/// and `afterEach` of that test share it across every attempt. Suite-level
/// hooks get a separate handle of their own.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub suite: String,
    /// `None` inside `beforeAll`/`afterAll`.
    pub test: Option<String>,
    pub slug: Option<String>,
    /// Zero-based attempt number; 0 for suite hooks.
    pub attempt: u32,
    pub client: ExchangeClient,
    pub variables: Arc<BTreeMap<String, String>>,
}

impl TestContext {
    pub(crate) fn for_suite(
        suite: &TestSuiteDefinition,
        client: ExchangeClient,
        variables: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            suite: suite.name.clone(),
            test: None,
            slug: None,
            attempt: 0,
            client,
            variables,
        }
    }

    pub(crate) fn for_attempt(
        suite: &TestSuiteDefinition,
        test: &TestDefinition,
        attempt: u32,
        client: ExchangeClient,
        variables: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            suite: suite.name.clone(),
            test: Some(test.name.clone()),
            slug: Some(test.slug.clone()),
            attempt,
            client,
            variables,
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }
}
