//! # Configuration
//!
//! `apiwarden.toml` is parsed into [`Config`]. Every field has a default, so an
//! empty or missing file is a valid configuration. CLI flags are applied on top
//! by the binary.
//!
//! ```toml
//! active_environment = "dev"
//!
//! [runner]
//! retries = 1
//! timeout_ms = 10000
//!
//! [http]
//! base_url = "{{host}}/v1"
//!
//! [environments.dev]
//! host = "http://localhost:8080"
//!
//! [governance]
//! enabled = true
//!
//! [governance.rules.response-time]
//! max_ms = 500
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::AuthMethod;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "apiwarden.toml";
pub const DEFAULT_DATABASE_PATH: &str = ".apiwarden/results.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerConfig,
    pub http: HttpConfig,
    /// Global variables; override environment and collection variables.
    pub variables: BTreeMap<String, String>,
    pub environments: BTreeMap<String, BTreeMap<String, String>>,
    pub active_environment: Option<String>,
    pub governance: InspectionConfig,
    pub security: InspectionConfig,
    pub database: DatabaseConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Global retry count; a test's own override wins, unset means 0.
    pub retries: Option<u32>,
    /// Global per-attempt timeout; a test's own override wins, unset means 30s.
    pub timeout_ms: Option<u64>,
    pub bail: bool,
    /// Accepted for compatibility. Suites and tests always run sequentially.
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: Option<String>,
    /// Transport-level timeout for a single request.
    pub timeout_ms: Option<u64>,
    pub verify_ssl: bool,
    pub proxy_url: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    pub auth: AuthMethod,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: None,
            verify_ssl: true,
            proxy_url: None,
            default_headers: BTreeMap::new(),
            auth: AuthMethod::None,
        }
    }
}

/// Shared shape of `[governance]` and `[security]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// Inspection only runs when this is set explicitly.
    pub enabled: bool,
    #[serde(alias = "checks")]
    pub rules: BTreeMap<String, RuleConfig>,
}

impl InspectionConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            rules: BTreeMap::new(),
        }
    }

    pub fn rule(&self, name: &str) -> RuleConfig {
        self.rules.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Option<String>,
    /// Rule-specific knobs such as `max_ms`.
    #[serde(flatten)]
    pub options: toml::Table,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            severity: None,
            options: toml::Table::new(),
        }
    }
}

impl RuleConfig {
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options
            .get(key)
            .and_then(toml::Value::as_integer)
            .and_then(|value| u64::try_from(value).ok())
    }

    pub fn option_strings(&self, key: &str) -> Option<Vec<String>> {
        let values = self.options.get(key)?.as_array()?;
        Some(
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
}

/// Output format for run reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw, &path.display().to_string())?;
        tracing::debug!(
            target: "apiwarden.config",
            path = %path.display(),
            environment = ?config.active_environment,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(
                target: "apiwarden.config",
                path = %path.display(),
                "no configuration file, using defaults"
            );
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
