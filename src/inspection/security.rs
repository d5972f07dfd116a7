use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::InspectionConfig;
use crate::http::{CapturedRequest, CapturedResponse, Exchange, HttpMethod};

use super::{InspectionContext, PluginRegistry, checks, guarded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl SecuritySeverity {
    pub const ALL: [SecuritySeverity; 5] = [
        SecuritySeverity::Critical,
        SecuritySeverity::High,
        SecuritySeverity::Medium,
        SecuritySeverity::Low,
        SecuritySeverity::Info,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            SecuritySeverity::Critical => "critical",
            SecuritySeverity::High => "high",
            SecuritySeverity::Medium => "medium",
            SecuritySeverity::Low => "low",
            SecuritySeverity::Info => "info",
        }
    }
}

impl fmt::Display for SecuritySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecuritySeverity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        SecuritySeverity::ALL
            .into_iter()
            .find(|severity| severity.as_str() == lowered)
            .ok_or_else(|| format!("unknown security severity `{lowered}`"))
    }
}

/// What a check reports; the scanner fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFinding {
    pub severity: SecuritySeverity,
    pub message: String,
    pub location: Option<String>,
    pub remediation: Option<String>,
}

impl CheckFinding {
    pub fn new(severity: SecuritySeverity, message: impl Into<String>) -> Self {
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
pub struct SecurityFinding {
    pub check: String,
    pub category: String,
    pub severity: SecuritySeverity,
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
pub trait SecurityCheck: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> &str;

    async fn evaluate(
        &self,
        request: &CapturedRequest,
        response: &CapturedResponse,
        endpoint: &str,
        context: &InspectionContext,
    ) -> anyhow::Result<Vec<CheckFinding>>;
}

/// Runs every registered security check over one exchange.
pub struct SecurityScanner {
    config: InspectionConfig,
    checks: PluginRegistry<dyn SecurityCheck>,
    severity_overrides: BTreeMap<String, SecuritySeverity>,
}

impl SecurityScanner {
    pub fn from_config(config: &InspectionConfig) -> Self {
        let mut scanner = Self::empty(config);
        for check in checks::builtin(config) {
            scanner.register(check);
        }
        scanner
    }

    pub fn empty(config: &InspectionConfig) -> Self {
        let mut severity_overrides = BTreeMap::new();
        for (name, check_config) in &config.rules {
            let Some(raw) = check_config.severity.as_deref() else {
                continue;
            };
            match raw.parse::<SecuritySeverity>() {
                Ok(severity) => {
                    severity_overrides.insert(name.clone(), severity);
                }
                Err(reason) => tracing::warn!(
                    target: "apiwarden.security",
                    check = %name,
                    %reason,
                    "ignoring severity override"
                ),
            }
        }

        Self {
            config: config.clone(),
            checks: PluginRegistry::default(),
            severity_overrides,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn register(&mut self, check: Arc<dyn SecurityCheck>) -> bool {
        let name = check.name().to_string();
        if !self.config.rule(&name).enabled {
            tracing::debug!(target: "apiwarden.security", check = %name, "check disabled by config");
            return false;
        }
        self.checks.register(name, check);
        true
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.names().map(str::to_string).collect()
    }

    pub async fn scan(&self, exchange: Option<&Exchange>, context: &InspectionContext) -> Vec<SecurityFinding> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let Some(exchange) = exchange else {
            return Vec::new();
        };

        let mut findings = Vec::new();
        for (name, check) in self.checks.iter() {
            let evaluation = check.evaluate(&exchange.request, &exchange.response, &context.endpoint, context);
            match guarded(evaluation).await {
                Ok(raw) => findings.extend(raw.into_iter().map(|finding| SecurityFinding {
                    check: name.to_string(),
                    category: check.category().to_string(),
                    severity: self.severity_overrides.get(name).copied().unwrap_or(finding.severity),
                    message: finding.message,
                    location: finding.location,
                    remediation: finding.remediation,
                    endpoint: context.endpoint.clone(),
                    method: context.method,
                    suite: context.suite.clone(),
                    test: context.test.clone(),
                    slug: context.slug.clone(),
                })),
                Err(err) => tracing::warn!(
                    target: "apiwarden.security",
                    check = %name,
                    suite = %context.suite,
                    test = %context.test,
                    error = %format!("{err:#}"),
                    "security check failed; continuing with remaining checks"
                ),
            }
        }

        tracing::debug!(
            target: "apiwarden.security",
            suite = %context.suite,
            test = %context.test,
            endpoint = %context.endpoint,
            findings = findings.len(),
            "security scan completed"
        );

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspection::fixtures;

    struct Flags;

    #[async_trait]
    impl SecurityCheck for Flags {
        fn name(&self) -> &str {
            "flags"
        }

        fn category(&self) -> &str {
            "exposure"
        }

        async fn evaluate(
            &self,
            _request: &CapturedRequest,
            response: &CapturedResponse,
            _endpoint: &str,
            _context: &InspectionContext,
        ) -> anyhow::Result<Vec<CheckFinding>> {
            Ok(vec![
                CheckFinding::new(SecuritySeverity::High, format!("status {}", response.status))
                    .at("response.status")
                    .remediation("do not do that"),
            ])
        }
    }

    struct Broken;

    #[async_trait]
    impl SecurityCheck for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn category(&self) -> &str {
            "exposure"
        }

        async fn evaluate(
            &self,
            _request: &CapturedRequest,
            _response: &CapturedResponse,
            _endpoint: &str,
            _context: &InspectionContext,
        ) -> anyhow::Result<Vec<CheckFinding>> {
            Err(anyhow::anyhow!("regex backtracking limit"))
        }
    }

    #[tokio::test]
    async fn scans_only_when_enabled() {
        let exchange = fixtures::exchange("https://api.test/users", 418, &[], "");
        let ctx = fixtures::context(&exchange);

        let mut disabled = SecurityScanner::empty(&InspectionConfig::default());
        disabled.register(Arc::new(Flags));
        assert!(disabled.scan(Some(&exchange), &ctx).await.is_empty());

        let mut enabled = SecurityScanner::empty(&InspectionConfig::enabled());
        enabled.register(Arc::new(Flags));
        enabled.register(Arc::new(Broken));
        let findings = enabled.scan(Some(&exchange), &ctx).await;

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.check, "flags");
        assert_eq!(finding.severity, SecuritySeverity::High);
        assert_eq!(finding.message, "status 418");
        assert_eq!(finding.location.as_deref(), Some("response.status"));
        assert_eq!(finding.endpoint, "/users");
    }

    #[test]
    fn severity_round_trips_through_strings() {
        for severity in SecuritySeverity::ALL {
            assert_eq!(severity.as_str().parse::<SecuritySeverity>().unwrap(), severity);
        }
        assert!("error".parse::<SecuritySeverity>().is_err());
    }
}
