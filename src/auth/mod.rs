//! # Authentication
//!
//! Credentials configured once in `[http.auth]` and applied to every request a
//! test sends: Bearer Token, Basic Auth, or an API key placed in a header or
//! the query string.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::HttpError;

/// Supported authentication methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    ApiKey {
        key: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

/// Where to place the API key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

impl AuthMethod {
    /// Reject configurations that could never produce a valid request.
    pub fn validate(&self) -> Result<(), HttpError> {
        match self {
            AuthMethod::None => Ok(()),
            AuthMethod::Bearer { token } if token.trim().is_empty() => {
                Err(HttpError::Auth("Bearer token cannot be empty".to_string()))
            }
            AuthMethod::Basic { username, .. } if username.trim().is_empty() => {
                Err(HttpError::Auth("Basic auth username cannot be empty".to_string()))
            }
            AuthMethod::ApiKey { key, .. } if key.trim().is_empty() => {
                Err(HttpError::Auth("API key name cannot be empty".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Insert the credential header, unless the test already set one with the same name.
    pub fn apply_headers(&self, headers: &mut BTreeMap<String, String>) {
        let (name, value) = match self {
            AuthMethod::None => return,
            AuthMethod::Bearer { token } => ("authorization".to_string(), format!("Bearer {}", token.trim())),
            AuthMethod::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{}:{}", username.trim(), password.trim()));
                ("authorization".to_string(), format!("Basic {encoded}"))
            }
            AuthMethod::ApiKey {
                key,
                value,
                location: ApiKeyLocation::Header,
            } => (key.trim().to_string(), value.trim().to_string()),
            AuthMethod::ApiKey { .. } => return,
        };

        if !headers.keys().any(|key| key.eq_ignore_ascii_case(&name)) {
            headers.insert(name, value);
        }
    }

    pub fn apply_query(&self, url: &mut reqwest::Url) {
        if let AuthMethod::ApiKey {
            key,
            value,
            location: ApiKeyLocation::Query,
        } = self
        {
            url.query_pairs_mut().append_pair(key.trim(), value.trim());
        }
    }
}
