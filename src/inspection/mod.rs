//! # Inspection Pipeline
//!
//! Two independent coordinators look at the last exchange of a passing test:
//! the [`GovernanceEngine`] (API design rules) and the [`SecurityScanner`]
//! (security checks). Both are opt-in: they only evaluate anything when their
//! config section sets `enabled = true`.
//!
//! Rules and checks are registered by name and implement a single async
//! `evaluate` method. They never see each other's output. A rule that returns
//! an error or panics is logged and skipped; the rest still run.

pub mod checks;
pub mod governance;
pub mod rules;
pub mod security;

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::http::{Exchange, HttpMethod};

pub use governance::{GovernanceEngine, GovernanceRule, GovernanceSeverity, GovernanceViolation, RuleViolation};
pub use security::{CheckFinding, SecurityCheck, SecurityFinding, SecurityScanner, SecuritySeverity};

/// Where an exchange came from, attached to every violation and finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionContext {
    pub suite: String,
    pub test: String,
    /// Durable identity of the test, used to attach results to it.
    pub slug: String,
    pub endpoint: String,
    pub method: HttpMethod,
}

impl InspectionContext {
    /// Prefer the test's own endpoint/method hints over what the exchange shows.
    pub fn for_exchange(
        suite: &str,
        test: &str,
        slug: &str,
        endpoint_hint: Option<&str>,
        method_hint: Option<HttpMethod>,
        exchange: &Exchange,
    ) -> Self {
        Self {
            suite: suite.to_string(),
            test: test.to_string(),
            slug: slug.to_string(),
            endpoint: endpoint_hint
                .map(str::to_string)
                .unwrap_or_else(|| exchange.request.path()),
            method: method_hint.unwrap_or(exchange.request.method),
        }
    }
}

/// Name → instance map for rules and checks.
pub struct PluginRegistry<T: ?Sized> {
    entries: BTreeMap<String, Arc<T>>,
}

impl<T: ?Sized> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: ?Sized> PluginRegistry<T> {
    /// Returns the instance previously registered under `name`, if any.
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<T>) -> Option<Arc<T>> {
        self.entries.insert(name.into(), plugin)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<T>> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.entries.iter().map(|(name, plugin)| (name.as_str(), plugin))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Await a rule evaluation, turning a panic into an ordinary error.
pub(crate) async fn guarded<T, F>(evaluation: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(evaluation).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|text| (*text).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(anyhow::anyhow!("panicked: {detail}"))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_falls_back_to_the_request_path() {
        let exchange = fixtures::exchange("https://api.test/v1/users?page=2", 200, &[], "");
        let ctx = InspectionContext::for_exchange("Users", "list", "users.list", None, None, &exchange);
        assert_eq!(ctx.endpoint, "/v1/users");
        assert_eq!(ctx.method, HttpMethod::Get);

        let ctx = InspectionContext::for_exchange("Users", "list", "users.list", Some("/users/{id}"), Some(HttpMethod::Put), &exchange);
        assert_eq!(ctx.endpoint, "/users/{id}");
        assert_eq!(ctx.method, HttpMethod::Put);
    }

    #[tokio::test]
    async fn guarded_turns_panics_into_errors() {
        let evaluation = async {
            if std::hint::black_box(true) {
                panic!("rule exploded");
            }
            Ok::<(), anyhow::Error>(())
        };
        let result = guarded(evaluation).await;
        assert_eq!(result.unwrap_err().to_string(), "panicked: rule exploded");
    }

    #[test]
    fn registry_replaces_by_name() {
        let mut registry: PluginRegistry<str> = PluginRegistry::default();
        assert!(registry.register("a", Arc::from("first")).is_none());
        let previous = registry.register("a", Arc::from("second")).unwrap();
        assert_eq!(&*previous, "first");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a"]);
    }
}
