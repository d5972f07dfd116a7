//! # Collection Files
//!
//! A JSON collection describes suites of saved requests with assertions and
//! is turned into a [`Registry`] that the runner executes like hand-written
//! tests:
//!
//! ```json
//! {
//!   "name": "Petstore",
//!   "variables": { "petId": "7" },
//!   "suites": [{
//!     "name": "Pets",
//!     "prefix": "pets",
//!     "tests": [{
//!       "name": "get pet",
//!       "request": { "method": "GET", "url": "/v1/pets/{{petId}}" },
//!       "assertions": [{ "target": "status", "operator": "equals", "expected": "200" }]
//!     }]
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environment::EnvironmentManager;
use crate::error::CollectionError;
use crate::http::{HttpMethod, RequestInput};
use crate::registry::{Registry, SuiteBuilder, TestBuilder};
use crate::testing::{Assertion, check_all};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collection {
    pub name: String,
    pub variables: BTreeMap<String, String>,
    pub suites: Vec<CollectionSuite>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSuite {
    pub name: String,
    pub prefix: Option<String>,
    pub tests: Vec<SavedTest>,
}

/// One saved request plus what its response must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedTest {
    pub name: String,
    pub id: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub skip: bool,
    pub only: bool,
    pub retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    /// Without a request the test is reported as todo.
    pub request: Option<SavedRequest>,
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// A string is sent as-is; any other JSON value is sent as JSON.
    #[serde(default)]
    pub body: Option<Value>,
}

impl Collection {
    pub fn load(path: &Path) -> Result<Self, CollectionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CollectionError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw, &path.display().to_string())
    }

    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self, CollectionError> {
        serde_json::from_str(raw).map_err(|source| CollectionError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Register every suite, with placeholders expanded from the resolved
    /// variables. `file` is recorded as each test's source file.
    pub fn register(
        &self,
        registry: &mut Registry,
        environment: &EnvironmentManager,
        file: Option<&str>,
    ) -> Result<(), CollectionError> {
        let variables = environment.resolve(&self.variables);

        for suite in &self.suites {
            registry.describe(suite.name.clone(), |builder| {
                if let Some(prefix) = &suite.prefix {
                    builder.prefix(environment.interpolate(prefix, &variables));
                }
                for test in &suite.tests {
                    add_test(builder, test, environment, &variables, file);
                }
            })?;
        }

        tracing::debug!(
            target: "apiwarden.collections",
            collection = %self.name,
            suites = self.suites.len(),
            "collection registered"
        );
        Ok(())
    }
}

fn add_test(
    suite: &mut SuiteBuilder,
    test: &SavedTest,
    environment: &EnvironmentManager,
    variables: &BTreeMap<String, String>,
    file: Option<&str>,
) {
    let mut builder = TestBuilder::new(test.name.clone());

    if let Some(request) = &test.request {
        let input = resolve_request(request, environment, variables);
        let assertions = test.assertions.clone();
        builder = builder.body(move |ctx| {
            let input = input.clone();
            let assertions = assertions.clone();
            async move {
                let response = ctx.client.send(input).await?;
                check_all(&assertions, &response)?;
                Ok(())
            }
        });
        builder.method(request.method).endpoint(endpoint_of(&input_url(request, environment, variables)));
    }

    if let Some(id) = &test.id {
        builder.id(id.clone());
    }
    if let Some(description) = &test.description {
        builder.describe(description.clone());
    }
    for tag in &test.tags {
        builder.tag(tag.clone());
    }
    if test.skip {
        builder.skip();
    }
    if test.only {
        builder.only();
    }
    if let Some(retries) = test.retries {
        builder.retries(retries);
    }
    if let Some(timeout_ms) = test.timeout_ms {
        builder.timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(file) = file {
        builder.file(file);
    }

    suite.add(builder);
}

fn input_url(request: &SavedRequest, environment: &EnvironmentManager, variables: &BTreeMap<String, String>) -> String {
    environment.interpolate(&request.url, variables)
}

fn resolve_request(
    request: &SavedRequest,
    environment: &EnvironmentManager,
    variables: &BTreeMap<String, String>,
) -> RequestInput {
    let mut input = RequestInput::new(request.method, input_url(request, environment, variables));
    for (name, value) in &request.headers {
        input = input.header(name.clone(), environment.interpolate(value, variables));
    }

    match &request.body {
        None | Some(Value::Null) => {}
        Some(Value::String(text)) => input = input.body(environment.interpolate(text, variables)),
        Some(other) => {
            let has_content_type = input.headers.keys().any(|name| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                input = input.header("Content-Type", "application/json");
            }
            input = input.body(environment.interpolate(&other.to_string(), variables));
        }
    }
    input
}

/// Path part of a request URL, used as the test's endpoint hint.
fn endpoint_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest);
    let path = match without_scheme {
        Some(rest) => rest.find('/').map(|index| &rest[index..]).unwrap_or("/"),
        None => url,
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
