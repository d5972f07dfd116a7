//! Error types shared across the registry, HTTP client, and persistence layers.
//!
//! Test-local failures (assertions, timeouts, hook errors) are not modelled here:
//! they travel as `anyhow::Error` out of test bodies and are folded into
//! [`crate::runner::TestError`] by the runner. The enums below cover the
//! structural failures that must reach the caller.

use thiserror::Error;

/// Failures raised while building suites and tests.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("test name exceeds {max} characters: `{preview}...`")]
    NameTooLong { max: usize, preview: String },

    #[error("suite `{0}` is already registered")]
    DuplicateSuite(String),

    #[error("suite name cannot be empty")]
    EmptySuiteName,
}

/// Failures raised by the exchange client.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid auth configuration: {0}")]
    Auth(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures raised when a test descriptor cannot be resolved to a durable identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("test descriptor for `{name}` has no slug")]
    MissingSlug { name: String },
}

/// Failures raised by the SQLite repository.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid JSON for column `{column}`: {source}")]
    Encode {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to create database directory `{path}`: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("test run {0} does not exist")]
    RunNotFound(i64),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Failures raised while loading `apiwarden.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown environment `{0}`")]
    UnknownEnvironment(String),
}

/// Failures raised while loading a collection file into a registry.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("failed to read collection file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse collection file `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Umbrella error surfaced by [`crate::harness::Harness`] and the binary.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("failed to write report `{path}`: {source}")]
    Report {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
