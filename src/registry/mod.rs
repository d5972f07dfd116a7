//! # Suite/Test Registry
//!
//! Suites and tests are registered once, before any run starts, through a small
//! builder DSL:
//!
//! ```no_run
//! # use apiwarden::registry::Registry;
//! # fn build() -> Result<Registry, apiwarden::error::RegistryError> {
//! let mut registry = Registry::new();
//! registry.describe("Users", |suite| {
//!     suite.prefix("api.users");
//!     suite
//!         .test("create user", |ctx| async move {
//!             let response = ctx.client.post_json("/users", &serde_json::json!({"name": "ada"})).await?;
//!             anyhow::ensure!(response.status == 201, "expected 201, got {}", response.status);
//!             Ok(())
//!         })
//!         .id("create")
//!         .retries(2);
//!     suite.todo("delete user");
//! })?;
//! # Ok(registry)
//! # }
//! ```
//!
//! The resulting [`TestSuiteDefinition`]s are immutable; the runner only reads them.

pub mod slug;

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::RegistryError;
use crate::http::HttpMethod;
use crate::runner::TestContext;

pub use slug::{MAX_SLUG_LENGTH, slugify, test_slug};

pub const MAX_TEST_NAME_LENGTH: usize = 512;

/// Outcome of a test body or hook. Any error fails the current attempt.
pub type BodyResult = anyhow::Result<()>;

/// A test body or hook. Hooks share the signature so they can use the client.
pub type TestFn = Arc<dyn Fn(TestContext) -> BoxFuture<'static, BodyResult> + Send + Sync>;

fn boxed<F, Fut>(f: F) -> TestFn
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BodyResult> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, BodyResult> { Box::pin(f(ctx)) })
}

#[derive(Clone)]
pub struct TestDefinition {
    pub name: String,
    pub slug: String,
    pub id: Option<String>,
    pub description: Option<String>,
    pub body: Option<TestFn>,
    pub stub: bool,
    pub skip: bool,
    pub only: bool,
    pub retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub tags: Vec<String>,
    pub endpoint: Option<String>,
    pub method: Option<HttpMethod>,
    pub file: Option<String>,
}

impl TestDefinition {
    /// A test with no body, or one explicitly marked as a stub, is reported as todo.
    pub fn is_todo(&self) -> bool {
        self.body.is_none() || self.stub
    }
}

impl fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDefinition")
            .field("name", &self.name)
            .field("slug", &self.slug)
            .field("has_body", &self.body.is_some())
            .field("stub", &self.stub)
            .field("skip", &self.skip)
            .field("only", &self.only)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct TestSuiteDefinition {
    pub name: String,
    pub prefix: Option<String>,
    pub before_all: Vec<TestFn>,
    pub after_all: Vec<TestFn>,
    pub before_each: Vec<TestFn>,
    pub after_each: Vec<TestFn>,
    pub tests: Vec<TestDefinition>,
}

impl TestSuiteDefinition {
    pub fn has_only(&self) -> bool {
        self.tests.iter().any(|test| test.only)
    }
}

impl fmt::Debug for TestSuiteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuiteDefinition")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("before_all", &self.before_all.len())
            .field("after_all", &self.after_all.len())
            .field("before_each", &self.before_each.len())
            .field("after_each", &self.after_each.len())
            .field("tests", &self.tests)
            .finish()
    }
}

/// Collects suites in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    suites: Vec<TestSuiteDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a suite. Fails if a test name is too long or the
    /// suite name is taken; nothing is registered in that case.
    pub fn describe<F>(&mut self, name: impl Into<String>, configure: F) -> Result<&TestSuiteDefinition, RegistryError>
    where
        F: FnOnce(&mut SuiteBuilder),
    {
        let mut builder = SuiteBuilder::new(name);
        configure(&mut builder);
        let suite = builder.build()?;
        self.add_suite(suite)
    }

    pub fn add_suite(&mut self, suite: TestSuiteDefinition) -> Result<&TestSuiteDefinition, RegistryError> {
        if suite.name.trim().is_empty() {
            return Err(RegistryError::EmptySuiteName);
        }
        if self.suites.iter().any(|existing| existing.name == suite.name) {
            return Err(RegistryError::DuplicateSuite(suite.name));
        }

        let mut seen: HashSet<&str> = self
            .suites
            .iter()
            .flat_map(|existing| existing.tests.iter().map(|test| test.slug.as_str()))
            .collect();
        for test in &suite.tests {
            if !seen.insert(test.slug.as_str()) {
                tracing::warn!(
                    target: "apiwarden.registry",
                    suite = %suite.name,
                    test = %test.name,
                    slug = %test.slug,
                    "duplicate test slug; both tests share one persisted identity"
                );
            }
        }

        tracing::debug!(
            target: "apiwarden.registry",
            suite = %suite.name,
            tests = suite.tests.len(),
            "suite registered"
        );

        let index = self.suites.len();
        self.suites.push(suite);
        Ok(&self.suites[index])
    }

    pub fn suites(&self) -> &[TestSuiteDefinition] {
        &self.suites
    }

    /// True when any test in any suite is flagged `only`.
    pub fn has_only(&self) -> bool {
        self.suites.iter().any(TestSuiteDefinition::has_only)
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|suite| suite.tests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }
}

pub struct SuiteBuilder {
    name: String,
    prefix: Option<String>,
    before_all: Vec<TestFn>,
    after_all: Vec<TestFn>,
    before_each: Vec<TestFn>,
    after_each: Vec<TestFn>,
    tests: Vec<TestBuilder>,
}

impl SuiteBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            tests: Vec::new(),
        }
    }

    /// Dot-separated slug prefix shared by every test in the suite.
    pub fn prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn before_all<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.before_all.push(boxed(hook));
        self
    }

    pub fn after_all<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.after_all.push(boxed(hook));
        self
    }

    pub fn before_each<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.before_each.push(boxed(hook));
        self
    }

    pub fn after_each<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.after_each.push(boxed(hook));
        self
    }

    #[track_caller]
    pub fn test<F, Fut>(&mut self, name: impl Into<String>, body: F) -> &mut TestBuilder
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        let builder = TestBuilder::new(name).body(body);
        self.add(builder)
    }

    /// Register a test with no body; it is always reported as todo.
    #[track_caller]
    pub fn todo(&mut self, name: impl Into<String>) -> &mut TestBuilder {
        self.add(TestBuilder::new(name))
    }

    pub fn add(&mut self, builder: TestBuilder) -> &mut TestBuilder {
        self.tests.push(builder);
        let last = self.tests.len() - 1;
        &mut self.tests[last]
    }

    pub fn build(self) -> Result<TestSuiteDefinition, RegistryError> {
        let prefix = self.prefix.filter(|prefix| !prefix.trim().is_empty());
        let tests = self
            .tests
            .into_iter()
            .map(|test| test.build(prefix.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TestSuiteDefinition {
            name: self.name,
            prefix,
            before_all: self.before_all,
            after_all: self.after_all,
            before_each: self.before_each,
            after_each: self.after_each,
            tests,
        })
    }
}

pub struct TestBuilder {
    name: String,
    id: Option<String>,
    description: Option<String>,
    body: Option<TestFn>,
    stub: bool,
    skip: bool,
    only: bool,
    retries: Option<u32>,
    timeout: Option<Duration>,
    tags: Vec<String>,
    endpoint: Option<String>,
    method: Option<HttpMethod>,
    file: Option<String>,
}

impl TestBuilder {
    /// Starts a bodiless test; the caller's source file is recorded as its file.
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            description: None,
            body: None,
            stub: false,
            skip: false,
            only: false,
            retries: None,
            timeout: None,
            tags: Vec::new(),
            endpoint: None,
            method: None,
            file: Some(Location::caller().file().to_string()),
        }
    }

    pub fn body<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.body = Some(boxed(body));
        self
    }

    /// Explicit identity; the slug derives from this instead of the name.
    pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    pub fn skip(&mut self) -> &mut Self {
        self.skip = true;
        self
    }

    pub fn only(&mut self) -> &mut Self {
        self.only = true;
        self
    }

    pub fn stub(&mut self) -> &mut Self {
        self.stub = true;
        self
    }

    pub fn retries(&mut self, retries: u32) -> &mut Self {
        self.retries = Some(retries);
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.push(tag.into());
        self
    }

    pub fn endpoint(&mut self, endpoint: impl Into<String>) -> &mut Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn method(&mut self, method: HttpMethod) -> &mut Self {
        self.method = Some(method);
        self
    }

    pub fn file(&mut self, file: impl Into<String>) -> &mut Self {
        self.file = Some(file.into());
        self
    }

    fn build(self, prefix: Option<&str>) -> Result<TestDefinition, RegistryError> {
        if self.name.chars().count() > MAX_TEST_NAME_LENGTH {
            return Err(RegistryError::NameTooLong {
                max: MAX_TEST_NAME_LENGTH,
                preview: self.name.chars().take(32).collect(),
            });
        }

        let id = self.id.filter(|id| !id.trim().is_empty());
        let slug = test_slug(prefix, id.as_deref(), &self.name);

        Ok(TestDefinition {
            name: self.name,
            slug,
            id,
            description: self.description,
            body: self.body,
            stub: self.stub,
            skip: self.skip,
            only: self.only,
            retries: self.retries,
            timeout: self.timeout,
            tags: self.tags,
            endpoint: self.endpoint,
            method: self.method,
            file: self.file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_computes_prefixed_slugs() {
        let mut registry = Registry::new();
        registry
            .describe("Users", |suite| {
                suite.prefix("api.users");
                suite.test("Create a user", |_| async { Ok(()) }).id("create");
                suite.test("Should Fetch User Data", |_| async { Ok(()) });
            })
            .unwrap();

        let suite = &registry.suites()[0];
        assert_eq!(suite.tests[0].slug, "api.users.create");
        assert_eq!(suite.tests[1].slug, "api.users.should-fetch-user-data");
    }

    #[test]
    fn todo_and_stub_tests_are_todo() {
        let mut registry = Registry::new();
        registry
            .describe("Suite", |suite| {
                suite.todo("not written yet");
                suite.test("stubbed", |_| async { Ok(()) }).stub();
                suite.test("real", |_| async { Ok(()) });
            })
            .unwrap();

        let tests = &registry.suites()[0].tests;
        assert!(tests[0].is_todo());
        assert!(tests[1].is_todo());
        assert!(!tests[2].is_todo());
    }

    #[test]
    fn overlong_names_fail_registration() {
        let mut registry = Registry::new();
        let err = registry
            .describe("Suite", |suite| {
                suite.todo("n".repeat(MAX_TEST_NAME_LENGTH + 1));
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::NameTooLong { max: MAX_TEST_NAME_LENGTH, .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn name_at_the_limit_is_accepted() {
        let mut registry = Registry::new();
        registry
            .describe("Suite", |suite| {
                suite.todo("n".repeat(MAX_TEST_NAME_LENGTH));
            })
            .unwrap();
        assert_eq!(registry.test_count(), 1);
    }

    #[test]
    fn duplicate_suite_names_are_rejected() {
        let mut registry = Registry::new();
        registry.describe("Suite", |_| {}).unwrap();
        assert!(matches!(
            registry.describe("Suite", |_| {}),
            Err(RegistryError::DuplicateSuite(name)) if name == "Suite"
        ));
    }

    #[test]
    fn has_only_looks_across_suites() {
        let mut registry = Registry::new();
        registry
            .describe("A", |suite| {
                suite.test("a", |_| async { Ok(()) });
            })
            .unwrap();
        assert!(!registry.has_only());

        registry
            .describe("B", |suite| {
                suite.test("b", |_| async { Ok(()) }).only();
            })
            .unwrap();
        assert!(registry.has_only());
        assert!(!registry.suites()[0].has_only());
    }

    #[test]
    fn records_the_registering_file() {
        let mut registry = Registry::new();
        registry
            .describe("Suite", |suite| {
                suite.todo("where am i");
            })
            .unwrap();
        let file = registry.suites()[0].tests[0].file.clone().unwrap();
        assert!(file.ends_with("mod.rs"), "unexpected file {file}");
    }
}
