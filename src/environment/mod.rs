//! # Environment & Variables
//!
//! Resolves global, environment, and collection-scoped variables and expands
//! `{{variable}}` placeholders in collection requests and the base URL.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::ConfigError;

/// Manages all environments and resolves variables.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentManager {
    pub globals: BTreeMap<String, String>,
    pub environments: BTreeMap<String, BTreeMap<String, String>>,
    pub active_environment: Option<String>,
}

impl EnvironmentManager {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if let Some(active) = &config.active_environment {
            if !config.environments.contains_key(active) {
                return Err(ConfigError::UnknownEnvironment(active.clone()));
            }
        }

        Ok(Self {
            globals: config.variables.clone(),
            environments: config.environments.clone(),
            active_environment: config.active_environment.clone(),
        })
    }

    /// Resolve all variables into a flat map, respecting scope precedence:
    /// collection < environment < global (higher scope overrides lower).
    pub fn resolve(&self, collection_vars: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut resolved = collection_vars.clone();

        if let Some(env) = self
            .active_environment
            .as_ref()
            .and_then(|name| self.environments.get(name))
        {
            resolved.extend(env.iter().map(|(key, value)| (key.clone(), value.clone())));
        }

        resolved.extend(self.globals.iter().map(|(key, value)| (key.clone(), value.clone())));
        resolved
    }

    /// Interpolate `{{variable}}` placeholders in the given text. Unknown
    /// placeholders are left untouched.
    pub fn interpolate(&self, text: &str, variables: &BTreeMap<String, String>) -> String {
        let mut result = text.to_string();
        for (key, value) in variables {
            let placeholder = format!("{{{{{key}}}}}");
            result = result.replace(&placeholder, value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn manager_with_dev() -> EnvironmentManager {
        let mut environments = BTreeMap::new();
        environments.insert("dev".to_string(), vars(&[("host", "dev.example.com")]));
        EnvironmentManager {
            globals: BTreeMap::new(),
            environments,
            active_environment: Some("dev".into()),
        }
    }

    #[test]
    fn resolve_collection_vars_only() {
        let mgr = EnvironmentManager::default();
        let resolved = mgr.resolve(&vars(&[("host", "localhost")]));
        assert_eq!(resolved.get("host").unwrap(), "localhost");
    }

    #[test]
    fn resolve_env_overrides_collection() {
        let mgr = manager_with_dev();
        let resolved = mgr.resolve(&vars(&[("host", "localhost")]));
        assert_eq!(resolved.get("host").unwrap(), "dev.example.com");
    }

    #[test]
    fn resolve_global_overrides_env() {
        let mut mgr = manager_with_dev();
        mgr.globals = vars(&[("host", "global.example.com")]);
        let resolved = mgr.resolve(&BTreeMap::new());
        assert_eq!(resolved.get("host").unwrap(), "global.example.com");
    }

    #[test]
    fn interpolate_replaces_placeholders() {
        let mgr = EnvironmentManager::default();
        let result = mgr.interpolate(
            "https://{{host}}:{{port}}/api",
            &vars(&[("host", "api.example.com"), ("port", "8080")]),
        );
        assert_eq!(result, "https://api.example.com:8080/api");
    }

    #[test]
    fn interpolate_leaves_unknown_placeholders() {
        let mgr = EnvironmentManager::default();
        assert_eq!(mgr.interpolate("{{unknown}}", &BTreeMap::new()), "{{unknown}}");
    }

    #[test]
    fn unknown_active_environment_is_rejected() {
        let config = Config {
            active_environment: Some("prod".into()),
            ..Config::default()
        };
        assert!(matches!(
            EnvironmentManager::from_config(&config),
            Err(ConfigError::UnknownEnvironment(name)) if name == "prod"
        ));
    }
}
