//! # Response Assertions
//!
//! Declarative checks evaluated against a [`CapturedResponse`]. Collection
//! files carry these; hand-written test bodies can use them too.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::CapturedResponse;

/// Part of the response an assertion looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "path", rename_all = "snake_case")]
pub enum AssertionTarget {
    Status,
    Header(String),
    /// Dotted path such as `$.data.items[0].id`.
    JsonPath(String),
    Body,
}

impl fmt::Display for AssertionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionTarget::Status => f.write_str("status"),
            AssertionTarget::Header(name) => write!(f, "header `{name}`"),
            AssertionTarget::JsonPath(path) => write!(f, "json path `{path}`"),
            AssertionTarget::Body => f.write_str("body"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

impl AssertionOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            AssertionOperator::Equals => "equals",
            AssertionOperator::NotEquals => "not_equals",
            AssertionOperator::Contains => "contains",
            AssertionOperator::GreaterThan => "greater_than",
            AssertionOperator::LessThan => "less_than",
            AssertionOperator::Exists => "exists",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(flatten)]
    pub target: AssertionTarget,
    pub operator: AssertionOperator,
    /// Ignored by `exists`.
    #[serde(default)]
    pub expected: String,
}

impl Assertion {
    pub fn new(target: AssertionTarget, operator: AssertionOperator, expected: impl Into<String>) -> Self {
        Self {
            target,
            operator,
            expected: expected.into(),
        }
    }

    pub fn status(expected: u16) -> Self {
        Self::new(AssertionTarget::Status, AssertionOperator::Equals, expected.to_string())
    }

    pub fn evaluate(&self, response: &CapturedResponse) -> AssertionResult {
        let actual = extract(&self.target, response);
        let passed = compare(self.operator, actual.as_deref(), &self.expected);
        let shown = actual.clone().unwrap_or_else(|| "<missing>".to_string());

        let message = if passed {
            format!("{} {} {}", self.target, self.operator.as_str(), self.expected)
        } else if self.operator == AssertionOperator::Exists {
            format!("expected {} to exist", self.target)
        } else {
            format!(
                "expected {} {} `{}`, got `{shown}`",
                self.target,
                self.operator.as_str(),
                self.expected
            )
        };

        AssertionResult {
            assertion: self.clone(),
            passed,
            actual,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionResult {
    pub assertion: Assertion,
    pub passed: bool,
    pub actual: Option<String>,
    pub message: String,
}

/// Evaluate every assertion and fail with all mismatches if any.
pub fn check_all(assertions: &[Assertion], response: &CapturedResponse) -> anyhow::Result<Vec<AssertionResult>> {
    let results: Vec<AssertionResult> = assertions.iter().map(|assertion| assertion.evaluate(response)).collect();
    let failures: Vec<&str> = results
        .iter()
        .filter(|result| !result.passed)
        .map(|result| result.message.as_str())
        .collect();

    if !failures.is_empty() {
        anyhow::bail!("{}", failures.join("; "));
    }
    Ok(results)
}

fn extract(target: &AssertionTarget, response: &CapturedResponse) -> Option<String> {
    match target {
        AssertionTarget::Status => Some(response.status.to_string()),
        AssertionTarget::Header(name) => response.header(name).map(str::to_string),
        AssertionTarget::Body => Some(response.body.clone()),
        AssertionTarget::JsonPath(path) => {
            let document: Value = serde_json::from_str(&response.body).ok()?;
            let pointer = json_pointer(path)?;
            document.pointer(&pointer).map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
        }
    }
}

fn compare(operator: AssertionOperator, actual: Option<&str>, expected: &str) -> bool {
    let Some(actual) = actual else {
        return operator == AssertionOperator::NotEquals;
    };
    match operator {
        AssertionOperator::Exists => true,
        AssertionOperator::Equals => actual == expected,
        AssertionOperator::NotEquals => actual != expected,
        AssertionOperator::Contains => actual.contains(expected),
        AssertionOperator::GreaterThan => numeric(actual, expected).is_some_and(|(a, e)| a > e),
        AssertionOperator::LessThan => numeric(actual, expected).is_some_and(|(a, e)| a < e),
    }
}

fn numeric(actual: &str, expected: &str) -> Option<(f64, f64)> {
    Some((actual.trim().parse().ok()?, expected.trim().parse().ok()?))
}

/// `$.a.b[0].c` → `/a/b/0/c`. Returns `None` for malformed paths.
pub fn json_pointer(path: &str) -> Option<String> {
    let trimmed = path.trim();
    let rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let mut pointer = String::new();

    for segment in rest.split('.').filter(|segment| !segment.is_empty()) {
        let (key, mut indices) = match segment.find('[') {
            Some(open) => (&segment[..open], &segment[open..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            pointer.push('/');
            pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
        }
        while let Some(inner) = indices.strip_prefix('[') {
            let close = inner.find(']')?;
            let index = &inner[..close];
            if index.is_empty() || !index.chars().all(|ch| ch.is_ascii_digit()) {
                return None;
            }
            pointer.push('/');
            pointer.push_str(index);
            indices = &inner[close + 1..];
        }
        if !indices.is_empty() {
            return None;
        }
    }
    Some(pointer)
}
