use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::method::HttpMethod;

/// A request a test wants to send. `url` may be relative to the client's base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInput {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RequestInput {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and mark it `application/json`.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let raw = serde_json::to_string(value)?;
        Ok(self.header("content-type", "application/json").body(raw))
    }
}

/// The request as it actually went on the wire, after URL resolution and
/// default headers were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl CapturedRequest {
    /// Path component of the URL, used as the endpoint when a test gives no hint.
    pub fn path(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(url) => url.path().to_string(),
            Err(_) => self
                .url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.headers, name)
    }
}

pub(crate) fn lookup_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
