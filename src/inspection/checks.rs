//! Built-in security checks.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::config::InspectionConfig;
use crate::http::{CapturedRequest, CapturedResponse};

use super::InspectionContext;
use super::security::{CheckFinding, SecurityCheck, SecuritySeverity};

pub const SECURITY_HEADERS: &str = "security-headers";
pub const SENSITIVE_DATA: &str = "sensitive-data";
pub const SERVER_DISCLOSURE: &str = "server-disclosure";
pub const INSECURE_TRANSPORT: &str = "insecure-transport";

const DEFAULT_REQUIRED_HEADERS: [&str; 3] = [
    "x-content-type-options",
    "strict-transport-security",
    "x-frame-options",
];

const DEFAULT_SENSITIVE_KEYS: [&str; 6] = [
    "password",
    "passwd",
    "secret",
    "api[_-]?key",
    "access[_-]?token",
    "private[_-]?key",
];

pub fn builtin(config: &InspectionConfig) -> Vec<Arc<dyn SecurityCheck>> {
    let mut checks: Vec<Arc<dyn SecurityCheck>> = Vec::new();

    let required = config
        .rule(SECURITY_HEADERS)
        .option_strings("required")
        .unwrap_or_else(|| DEFAULT_REQUIRED_HEADERS.iter().map(|name| name.to_string()).collect());
    checks.push(Arc::new(SecurityHeadersCheck { required }));

    let keys = config
        .rule(SENSITIVE_DATA)
        .option_strings("keys")
        .unwrap_or_else(|| DEFAULT_SENSITIVE_KEYS.iter().map(|key| key.to_string()).collect());
    match SensitiveDataCheck::new(&keys) {
        Ok(check) => checks.push(Arc::new(check)),
        Err(err) => tracing::warn!(
            target: "apiwarden.security",
            check = SENSITIVE_DATA,
            error = %err,
            "invalid sensitive key pattern; check not registered"
        ),
    }

    checks.push(Arc::new(ServerDisclosureCheck));
    checks.push(Arc::new(InsecureTransportCheck));
    checks
}

pub struct SecurityHeadersCheck {
    pub required: Vec<String>,
}

#[async_trait]
impl SecurityCheck for SecurityHeadersCheck {
    fn name(&self) -> &str {
        SECURITY_HEADERS
    }

    fn category(&self) -> &str {
        "headers"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<CheckFinding>> {
        Ok(self
            .required
            .iter()
            .filter(|name| response.header(name).is_none())
            .map(|name| {
                CheckFinding::new(SecuritySeverity::Medium, format!("missing `{name}` response header"))
                    .at(format!("response.headers.{name}"))
                    .remediation(format!("set `{name}` on every response"))
            })
            .collect())
    }
}

/// Flags response bodies that carry credential-like JSON keys.
pub struct SensitiveDataCheck {
    pattern: Regex,
}

impl SensitiveDataCheck {
    pub fn new(keys: &[String]) -> Result<Self, regex::Error> {
        let alternatives = keys.join("|");
        let pattern = Regex::new(&format!(r#"(?i)"({alternatives})"\s*:\s*"?[^",}}\s]"#))?;
        Ok(Self { pattern })
    }
}

#[async_trait]
impl SecurityCheck for SensitiveDataCheck {
    fn name(&self) -> &str {
        SENSITIVE_DATA
    }

    fn category(&self) -> &str {
        "data-exposure"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<CheckFinding>> {
        let mut keys: Vec<String> = self
            .pattern
            .captures_iter(&response.body)
            .filter_map(|captures| captures.get(1).map(|key| key.as_str().to_ascii_lowercase()))
            .collect();
        keys.sort();
        keys.dedup();

        Ok(keys
            .into_iter()
            .map(|key| {
                CheckFinding::new(SecuritySeverity::High, format!("response body exposes `{key}`"))
                    .at(format!("response.body.{key}"))
                    .remediation("remove credentials and secrets from API responses")
            })
            .collect())
    }
}

pub struct ServerDisclosureCheck;

#[async_trait]
impl SecurityCheck for ServerDisclosureCheck {
    fn name(&self) -> &str {
        SERVER_DISCLOSURE
    }

    fn category(&self) -> &str {
        "information-disclosure"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<CheckFinding>> {
        let mut findings = Vec::new();
        if let Some(server) = response.header("server").filter(|value| value.chars().any(|ch| ch.is_ascii_digit())) {
            findings.push(
                CheckFinding::new(SecuritySeverity::Low, format!("`server` header reveals a version: {server}"))
                    .at("response.headers.server")
                    .remediation("strip version numbers from the server banner"),
            );
        }
        if let Some(powered_by) = response.header("x-powered-by") {
            findings.push(
                CheckFinding::new(SecuritySeverity::Low, format!("`x-powered-by` header reveals the stack: {powered_by}"))
                    .at("response.headers.x-powered-by")
                    .remediation("remove the x-powered-by header"),
            );
        }
        Ok(findings)
    }
}

pub struct InsecureTransportCheck;

#[async_trait]
impl SecurityCheck for InsecureTransportCheck {
    fn name(&self) -> &str {
        INSECURE_TRANSPORT
    }

    fn category(&self) -> &str {
        "transport"
    }

    async fn evaluate(
        &self,
        request: &CapturedRequest,
        _response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<CheckFinding>> {
        let url = reqwest::Url::parse(&request.url)?;
        if url.scheme() != "http" || is_loopback(&url) {
            return Ok(Vec::new());
        }
        Ok(vec![
            CheckFinding::new(SecuritySeverity::High, format!("request to {} used plain HTTP", url.host_str().unwrap_or("?")))
                .at("request.url")
                .remediation("serve the API over HTTPS only"),
        ])
    }
}

fn is_loopback(url: &reqwest::Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}
