use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::InspectionConfig;
use crate::http::{CapturedRequest, CapturedResponse, Exchange, HttpMethod};

use super::{InspectionContext, PluginRegistry, guarded, rules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceSeverity {
    Error,
    Warning,
    Info,
}

impl GovernanceSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            GovernanceSeverity::Error => "error",
            GovernanceSeverity::Warning => "warning",
            GovernanceSeverity::Info => "info",
        }
    }
}

impl fmt::Display for GovernanceSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GovernanceSeverity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(GovernanceSeverity::Error),
            "warning" | "warn" => Ok(GovernanceSeverity::Warning),
            "info" => Ok(GovernanceSeverity::Info),
            other => Err(format!("unknown governance severity `{other}`")),
        }
    }
}

/// What a rule reports; the engine fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub severity: GovernanceSeverity,
    pub message: String,
    pub location: Option<String>,
    pub remediation: Option<String>,
}

impl RuleViolation {
    pub fn new(severity: GovernanceSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location: None,
            remediation: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceViolation {
    pub rule: String,
    pub category: String,
    pub severity: GovernanceSeverity,
    pub message: String,
    pub location: Option<String>,
    pub remediation: Option<String>,
    pub endpoint: String,
    pub method: HttpMethod,
    pub suite: String,
    pub test: String,
    pub slug: String,
}

#[async_trait]
pub trait GovernanceRule: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> &str;

    async fn evaluate(
        &self,
        request: &CapturedRequest,
        response: &CapturedResponse,
        endpoint: &str,
        context: &InspectionContext,
    ) -> anyhow::Result<Vec<RuleViolation>>;
}

/// Runs every registered governance rule over one exchange.
pub struct GovernanceEngine {
    config: InspectionConfig,
    rules: PluginRegistry<dyn GovernanceRule>,
    severity_overrides: BTreeMap<String, GovernanceSeverity>,
}

impl GovernanceEngine {
    /// Engine with the built-in rules that the config leaves enabled.
    pub fn from_config(config: &InspectionConfig) -> Self {
        let mut engine = Self::empty(config);
        for rule in rules::builtin(config) {
            engine.register(rule);
        }
        engine
    }

    /// Engine with no rules registered.
    pub fn empty(config: &InspectionConfig) -> Self {
        let mut severity_overrides = BTreeMap::new();
        for (name, rule_config) in &config.rules {
            let Some(raw) = rule_config.severity.as_deref() else {
                continue;
            };
            match raw.parse::<GovernanceSeverity>() {
                Ok(severity) => {
                    severity_overrides.insert(name.clone(), severity);
                }
                Err(reason) => tracing::warn!(
                    target: "apiwarden.governance",
                    rule = %name,
                    %reason,
                    "ignoring severity override"
                ),
            }
        }

        Self {
            config: config.clone(),
            rules: PluginRegistry::default(),
            severity_overrides,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Register a rule unless its config entry disables it. Returns whether it was added.
    pub fn register(&mut self, rule: Arc<dyn GovernanceRule>) -> bool {
        let name = rule.name().to_string();
        if !self.config.rule(&name).enabled {
            tracing::debug!(target: "apiwarden.governance", rule = %name, "rule disabled by config");
            return false;
        }
        self.rules.register(name, rule);
        true
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.names().map(str::to_string).collect()
    }

    /// Evaluate every rule against the exchange. A disabled engine or a test
    /// without an exchange yields nothing.
    pub async fn evaluate(&self, exchange: Option<&Exchange>, context: &InspectionContext) -> Vec<GovernanceViolation> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let Some(exchange) = exchange else {
            return Vec::new();
        };

        let mut violations = Vec::new();
        for (name, rule) in self.rules.iter() {
            let evaluation = rule.evaluate(&exchange.request, &exchange.response, &context.endpoint, context);
            match guarded(evaluation).await {
                Ok(raw) => violations.extend(raw.into_iter().map(|violation| self.normalize(name, rule.category(), violation, context))),
                Err(err) => tracing::warn!(
                    target: "apiwarden.governance",
                    rule = %name,
                    suite = %context.suite,
                    test = %context.test,
                    error = %format!("{err:#}"),
                    "governance rule failed; continuing with remaining rules"
                ),
            }
        }

        tracing::debug!(
            target: "apiwarden.governance",
            suite = %context.suite,
            test = %context.test,
            endpoint = %context.endpoint,
            violations = violations.len(),
            "governance evaluation completed"
        );

        violations
    }

    fn normalize(
        &self,
        rule: &str,
        category: &str,
        violation: RuleViolation,
        context: &InspectionContext,
    ) -> GovernanceViolation {
        GovernanceViolation {
            rule: rule.to_string(),
            category: category.to_string(),
            severity: self.severity_overrides.get(rule).copied().unwrap_or(violation.severity),
            message: violation.message,
            location: violation.location,
            remediation: violation.remediation,
            endpoint: context.endpoint.clone(),
            method: context.method,
            suite: context.suite.clone(),
            test: context.test.clone(),
            slug: context.slug.clone(),
        }
    }
}
