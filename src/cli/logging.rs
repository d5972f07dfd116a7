//! Tracing subscriber for the binary. Logs go to stderr so reports on stdout
//! stay machine-readable.
//!
//! Filter priority: `APIWARDEN_LOG`, then `RUST_LOG`, then `-v`/`-q`, then `warn`.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_ENV: &str = "APIWARDEN_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Verbose wins when both flags are given.
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Call once, before loading config.
pub fn init(verbosity: Verbosity, no_color: bool) {
    let use_ansi = !no_color && std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(build_filter(verbosity));
    if verbosity == Verbosity::Verbose {
        registry.with(fmt_layer.with_timer(fmt::time::uptime())).init();
    } else {
        registry.with(fmt_layer.without_time().compact()).init();
    }
}

fn build_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = verbosity.default_level();
    let directive = match verbosity {
        Verbosity::Verbose => format!("{level},apiwarden=debug"),
        Verbosity::Normal | Verbosity::Quiet => level.to_string(),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
    }

    #[test]
    fn default_levels() {
        assert_eq!(Verbosity::Quiet.default_level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.default_level(), Level::WARN);
        assert_eq!(Verbosity::Verbose.default_level(), Level::DEBUG);
    }

    #[test]
    fn fallback_filters_build() {
        let _ = build_filter(Verbosity::Quiet);
        let _ = build_filter(Verbosity::Normal);
        let _ = build_filter(Verbosity::Verbose);
    }
}
