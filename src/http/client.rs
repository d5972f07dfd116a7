use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};

use crate::auth::AuthMethod;
use crate::config::HttpConfig;
use crate::error::HttpError;

use super::method::HttpMethod;
use super::request::{CapturedRequest, RequestInput};
use super::response::CapturedResponse;

/// The most recent request/response pair seen by one client handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub request: CapturedRequest,
    pub response: CapturedResponse,
}

/// HTTP client handed to a single test context.
///
/// Clones share the same "last exchange" slot, so hooks and the test body of
/// one test see the same exchange. [`ExchangeClient::fork`] gives a new test
/// its own slot while reusing the connection pool.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    http: Client,
    base_url: Option<String>,
    default_headers: BTreeMap<String, String>,
    auth: AuthMethod,
    last: Arc<Mutex<Option<Exchange>>>,
}

impl ExchangeClient {
    pub fn from_config(config: &HttpConfig) -> Result<Self, HttpError> {
        config.auth.validate()?;

        let mut builder = Client::builder().redirect(reqwest::redirect::Policy::limited(10));

        if let Some(ms) = config.timeout_ms {
            if ms > 0 {
                builder = builder.timeout(Duration::from_millis(ms));
            }
        }

        if let Some(ref proxy_url) = config.proxy_url {
            if !proxy_url.is_empty() {
                let proxy = Proxy::all(proxy_url).map_err(|err| HttpError::Client(format!("invalid proxy URL: {err}")))?;
                builder = builder.proxy(proxy);
            }
        }

        if !config.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(|err| HttpError::Client(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone().filter(|url| !url.trim().is_empty()),
            default_headers: config.default_headers.clone(),
            auth: config.auth.clone(),
            last: Arc::new(Mutex::new(None)),
        })
    }

    /// A handle sharing the connection pool but with an empty exchange slot.
    pub fn fork(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            default_headers: self.default_headers.clone(),
            auth: self.auth.clone(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub async fn send(&self, input: RequestInput) -> Result<CapturedResponse, HttpError> {
        let mut url = self.resolve_url(&input.url)?;
        self.auth.apply_query(&mut url);

        let mut headers = self.default_headers.clone();
        headers.extend(input.headers);
        self.auth.apply_headers(&mut headers);

        let mut request = self
            .http
            .request(input.method.into(), url.clone())
            .headers(build_headers(&headers)?);

        let body = input.body.filter(|_| !input.method.is_bodiless());
        if let Some(ref body) = body {
            request = request.body(body.clone());
        }

        let started = Instant::now();
        let response = request.send().await?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let status = response.status();
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            response_headers.insert(name.to_string(), value.to_str().unwrap_or("<binary>").to_string());
        }
        let bytes = response.bytes().await?;

        let captured = CapturedResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers: response_headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            response_time_ms: elapsed,
            size_bytes: bytes.len() as u64,
        };

        tracing::debug!(
            target: "apiwarden.http",
            method = %input.method,
            url = %url,
            status = captured.status,
            elapsed_ms = elapsed,
            "exchange captured"
        );

        self.record(Exchange {
            request: CapturedRequest {
                method: input.method,
                url: url.to_string(),
                headers,
                body,
            },
            response: captured.clone(),
        });

        Ok(captured)
    }

    pub async fn get(&self, url: &str) -> Result<CapturedResponse, HttpError> {
        self.send(RequestInput::new(HttpMethod::Get, url)).await
    }

    pub async fn delete(&self, url: &str) -> Result<CapturedResponse, HttpError> {
        self.send(RequestInput::new(HttpMethod::Delete, url)).await
    }

    pub async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<CapturedResponse, HttpError> {
        self.send_json(HttpMethod::Post, url, body).await
    }

    pub async fn put_json<T: Serialize>(&self, url: &str, body: &T) -> Result<CapturedResponse, HttpError> {
        self.send_json(HttpMethod::Put, url, body).await
    }

    pub async fn patch_json<T: Serialize>(&self, url: &str, body: &T) -> Result<CapturedResponse, HttpError> {
        self.send_json(HttpMethod::Patch, url, body).await
    }

    async fn send_json<T: Serialize>(
        &self,
        method: HttpMethod,
        url: &str,
        body: &T,
    ) -> Result<CapturedResponse, HttpError> {
        let input = RequestInput::new(method, url)
            .json(body)
            .map_err(|err| HttpError::Client(format!("failed to encode JSON body: {err}")))?;
        self.send(input).await
    }

    /// Store an exchange as the most recent one. `send` calls this; it is public
    /// so exchanges obtained elsewhere can still be inspected.
    pub fn record(&self, exchange: Exchange) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(exchange);
    }

    pub fn last_exchange(&self) -> Option<Exchange> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_request(&self) -> Option<CapturedRequest> {
        self.last_exchange().map(|exchange| exchange.request)
    }

    pub fn last_response(&self) -> Option<CapturedResponse> {
        self.last_exchange().map(|exchange| exchange.response)
    }

    /// Absolute URLs pass through; anything else is appended to the base URL.
    pub fn resolve_url(&self, raw: &str) -> Result<reqwest::Url, HttpError> {
        let raw = raw.trim();
        if let Ok(url) = reqwest::Url::parse(raw) {
            return Ok(url);
        }

        let Some(base) = self.base_url.as_deref() else {
            return Err(HttpError::InvalidUrl {
                url: raw.to_string(),
                reason: "relative URL without a configured base_url".to_string(),
            });
        };

        let joined = if raw.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), raw.trim_start_matches('/'))
        };
        reqwest::Url::parse(&joined).map_err(|err| HttpError::InvalidUrl {
            url: joined.clone(),
            reason: err.to_string(),
        })
    }
}

pub fn build_headers(input: &BTreeMap<String, String>) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| HttpError::InvalidHeader {
            name: key.to_string(),
            reason: err.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|err| HttpError::InvalidHeader {
            name: key.to_string(),
            reason: err.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
