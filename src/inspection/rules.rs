//! Built-in governance rules.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::InspectionConfig;
use crate::http::{CapturedRequest, CapturedResponse};

use super::InspectionContext;
use super::governance::{GovernanceRule, GovernanceSeverity, RuleViolation};

pub const RESPONSE_TIME: &str = "response-time";
pub const JSON_CONTENT_TYPE: &str = "json-content-type";
pub const VERSIONED_PATH: &str = "versioned-path";
pub const ERROR_FORMAT: &str = "error-format";

const DEFAULT_MAX_RESPONSE_MS: u64 = 2_000;

pub fn builtin(config: &InspectionConfig) -> Vec<Arc<dyn GovernanceRule>> {
    let max_ms = config
        .rule(RESPONSE_TIME)
        .option_u64("max_ms")
        .unwrap_or(DEFAULT_MAX_RESPONSE_MS);

    vec![
        Arc::new(ResponseTimeRule { max_ms }),
        Arc::new(JsonContentTypeRule),
        Arc::new(VersionedPathRule),
        Arc::new(ErrorFormatRule),
    ]
}

pub struct ResponseTimeRule {
    pub max_ms: u64,
}

#[async_trait]
impl GovernanceRule for ResponseTimeRule {
    fn name(&self) -> &str {
        RESPONSE_TIME
    }

    fn category(&self) -> &str {
        "performance"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<RuleViolation>> {
        if response.response_time_ms <= self.max_ms {
            return Ok(Vec::new());
        }
        Ok(vec![
            RuleViolation::new(
                GovernanceSeverity::Warning,
                format!("response took {}ms, budget is {}ms", response.response_time_ms, self.max_ms),
            )
            .at("response.time")
            .remediation("add caching or pagination, or raise governance.rules.response-time.max_ms"),
        ])
    }
}

pub struct JsonContentTypeRule;

#[async_trait]
impl GovernanceRule for JsonContentTypeRule {
    fn name(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn category(&self) -> &str {
        "content-negotiation"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<RuleViolation>> {
        if response.body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let content_type = response.content_type().unwrap_or_default();
        if content_type.to_ascii_lowercase().contains("json") {
            return Ok(Vec::new());
        }
        let shown = if content_type.is_empty() { "<missing>" } else { content_type };
        Ok(vec![
            RuleViolation::new(
                GovernanceSeverity::Warning,
                format!("response body is served as {shown}, expected a JSON media type"),
            )
            .at("response.headers.content-type")
            .remediation("return application/json (or application/problem+json for errors)"),
        ])
    }
}

pub struct VersionedPathRule;

#[async_trait]
impl GovernanceRule for VersionedPathRule {
    fn name(&self) -> &str {
        VERSIONED_PATH
    }

    fn category(&self) -> &str {
        "versioning"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        _response: &CapturedResponse,
        endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<RuleViolation>> {
        if endpoint.split('/').any(is_version_segment) {
            return Ok(Vec::new());
        }
        Ok(vec![
            RuleViolation::new(GovernanceSeverity::Info, format!("`{endpoint}` has no version segment"))
                .at("request.url")
                .remediation("prefix routes with a version such as /v1/"),
        ])
    }
}

fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some('v' | 'V')) && {
        let rest = chars.as_str();
        !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit())
    }
}

pub struct ErrorFormatRule;

#[async_trait]
impl GovernanceRule for ErrorFormatRule {
    fn name(&self) -> &str {
        ERROR_FORMAT
    }

    fn category(&self) -> &str {
        "error-handling"
    }

    async fn evaluate(
        &self,
        _request: &CapturedRequest,
        response: &CapturedResponse,
        _endpoint: &str,
        _context: &InspectionContext,
    ) -> anyhow::Result<Vec<RuleViolation>> {
        if response.status < 400 {
            return Ok(Vec::new());
        }

        let message = if response.body.trim().is_empty() {
            format!("{} response has an empty body", response.status)
        } else if serde_json::from_str::<serde_json::Value>(&response.body).is_err() {
            format!("{} response body is not JSON", response.status)
        } else {
            return Ok(Vec::new());
        };

        Ok(vec![
            RuleViolation::new(GovernanceSeverity::Warning, message)
                .at("response.body")
                .remediation("return a structured error object, e.g. RFC 7807 problem details"),
        ])
    }
}
