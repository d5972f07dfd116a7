//! # Command Line
//!
//! `apiwarden run`-style entry point for CI: load config, register one or
//! more collection files, run them, print a report, and exit non-zero when
//! anything failed.

pub mod logging;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::collections::Collection;
use crate::config::{Config, DEFAULT_CONFIG_FILE, OutputFormat};
use crate::error::HarnessError;
use crate::harness::{Harness, HarnessOutcome};
use crate::registry::Registry;
use crate::reporting::{json, write_console_report};

#[derive(Debug, Clone, Parser)]
#[command(name = "apiwarden", version, about = "Run API test collections with governance and security inspection")]
pub struct Cli {
    /// Collection files to run, in order.
    #[arg(required = true)]
    pub collections: Vec<PathBuf>,

    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Environment from `[environments.<name>]` to activate.
    #[arg(long = "env")]
    pub environment: Option<String>,

    #[arg(long)]
    pub retries: Option<u32>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Stop after the first failure.
    #[arg(long)]
    pub bail: bool,

    /// Turn on the governance engine.
    #[arg(long)]
    pub governance: bool,

    /// Turn on the security scanner.
    #[arg(long)]
    pub security: bool,

    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Also write the report to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Results database path.
    #[arg(long, conflicts_with = "no_db")]
    pub db: Option<PathBuf>,

    /// Do not record this run.
    #[arg(long)]
    pub no_db: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(short, long)]
    pub quiet: bool,

    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Command-line flags win over the config file.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(environment) = &self.environment {
            config.active_environment = Some(environment.clone());
        }
        if let Some(retries) = self.retries {
            config.runner.retries = Some(retries);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.runner.timeout_ms = Some(timeout_ms);
        }
        if self.bail {
            config.runner.bail = true;
        }
        if self.governance {
            config.governance.enabled = true;
        }
        if self.security {
            config.security.enabled = true;
        }
        if let Some(format) = self.format {
            config.report.format = format;
        }
        if let Some(report) = &self.report {
            config.report.output = Some(report.clone());
        }
        if let Some(db) = &self.db {
            config.database.path = db.clone();
            config.database.enabled = true;
        }
        if self.no_db {
            config.database.enabled = false;
        }
    }
}

/// Load, run, and report. The caller turns [`HarnessOutcome::has_failures`]
/// into the exit code.
pub async fn run(cli: Cli) -> Result<HarnessOutcome, HarnessError> {
    let mut config = Config::load_or_default(&cli.config)?;
    cli.apply_overrides(&mut config);

    let harness = Harness::new(config);
    let registry = load_registry(&cli.collections, &harness)?;
    if registry.is_empty() {
        tracing::warn!(target: "apiwarden.cli", "no suites registered; nothing to run");
    }

    let outcome = harness.run(&registry).await?;
    emit_reports(&outcome, &harness.config().report)?;
    Ok(outcome)
}

fn load_registry(paths: &[PathBuf], harness: &Harness) -> Result<Registry, HarnessError> {
    let environment = harness.environment()?;
    let mut registry = Registry::new();
    for path in paths {
        let collection = Collection::load(path)?;
        collection.register(&mut registry, &environment, Some(&path.display().to_string()))?;
    }
    Ok(registry)
}

fn emit_reports(outcome: &HarnessOutcome, report: &crate::config::ReportConfig) -> Result<(), HarnessError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_report(&mut out, outcome, report.format).map_err(|source| HarnessError::Report {
        path: "<stdout>".to_string(),
        source,
    })?;

    if let Some(path) = &report.output {
        write_report_file(path, outcome, report.format).map_err(|source| HarnessError::Report {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(target: "apiwarden.cli", path = %path.display(), "report written");
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, outcome: &HarnessOutcome, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Text => write_console_report(out, &outcome.report, outcome.deleted_tests()),
        OutputFormat::Json => json::write_json(out, &outcome.report, outcome.deleted_tests()),
    }
}

fn write_report_file(path: &Path, outcome: &HarnessOutcome, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Json => json::write_json_report(path, &outcome.report, outcome.deleted_tests()),
        OutputFormat::Text => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = io::BufWriter::new(std::fs::File::create(path)?);
            write_report(&mut file, outcome, format)?;
            file.flush()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "apiwarden",
            "users.json",
            "--env",
            "staging",
            "--retries",
            "3",
            "--timeout-ms",
            "500",
            "--bail",
            "--governance",
            "--format",
            "json",
            "--no-db",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(cli.collections, vec![PathBuf::from("users.json")]);
        assert_eq!(config.active_environment.as_deref(), Some("staging"));
        assert_eq!(config.runner.retries, Some(3));
        assert_eq!(config.runner.timeout_ms, Some(500));
        assert!(config.runner.bail);
        assert!(config.governance.enabled);
        assert!(!config.security.enabled);
        assert_eq!(config.report.format, OutputFormat::Json);
        assert!(!config.database.enabled);
    }

    #[test]
    fn db_and_no_db_conflict() {
        assert!(Cli::try_parse_from(["apiwarden", "a.json", "--db", "x.db", "--no-db"]).is_err());
    }

    #[test]
    fn requires_a_collection() {
        assert!(Cli::try_parse_from(["apiwarden"]).is_err());
    }

    #[tokio::test]
    async fn runs_a_collection_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let collection = dir.path().join("pending.json");
        std::fs::write(
            &collection,
            r#"{ "suites": [ { "name": "Pending", "tests": [ { "name": "write later" } ] } ] }"#,
        )
        .unwrap();
        let report = dir.path().join("report.json");

        let path = |p: &Path| p.display().to_string();
        let cli = Cli::try_parse_from([
            "apiwarden".to_string(),
            path(&collection),
            "--config".into(),
            path(&dir.path().join("missing.toml")),
            "--db".into(),
            path(&dir.path().join("results.db")),
            "--format".into(),
            "json".into(),
            "--report".into(),
            path(&report),
        ])
        .unwrap();

        let outcome = run(cli).await.unwrap();
        assert!(!outcome.has_failures());
        assert!(outcome.persistence.is_some());

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(written["summary"]["todo"], 1);
        assert!(dir.path().join("results.db").exists());
    }
}
