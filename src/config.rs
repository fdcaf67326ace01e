use std::{env, path::PathBuf};

use thiserror::Error;

use crate::domain::diagnostics::Diagnostic;
use crate::sink::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub min_level: Level,
    pub output: OutputFormat,
    pub journalctl: String,
    pub snapshot_file: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DIAG_LOG_LEVEL must be one of: error, warn, info, debug")]
    InvalidLevel,
    #[error("DIAG_OUTPUT must be one of: text, json")]
    InvalidOutput,
    #[error("DIAG_JOURNALCTL must not be empty")]
    EmptyJournalctl,
    #[error("DIAG_DIAGNOSTICS contains unknown diagnostic {0:?}")]
    UnknownDiagnostic(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let min_level = var("DIAG_LOG_LEVEL")
            .map(|value| Level::parse(&value).ok_or(ConfigError::InvalidLevel))
            .transpose()?
            .unwrap_or(Level::Info);

        let output = match var("DIAG_OUTPUT").map(|value| value.to_ascii_lowercase()).as_deref() {
            None | Some("text") => OutputFormat::Text,
            Some("json") => OutputFormat::Json,
            Some(_) => return Err(ConfigError::InvalidOutput),
        };

        let journalctl = match lookup("DIAG_JOURNALCTL") {
            None => "journalctl".to_string(),
            Some(value) if value.trim().is_empty() => return Err(ConfigError::EmptyJournalctl),
            Some(value) => value.trim().to_string(),
        };

        let snapshot_file = var("DIAG_SNAPSHOT_FILE").map(PathBuf::from);

        let diagnostics = match var("DIAG_DIAGNOSTICS") {
            None => Diagnostic::ALL.to_vec(),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| {
                    Diagnostic::from_name(name)
                        .ok_or_else(|| ConfigError::UnknownDiagnostic(name.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Self {
            min_level,
            output,
            journalctl,
            snapshot_file,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = config_from(&[]).expect("config should parse");
        assert_eq!(config.min_level, Level::Info);
        assert_eq!(config.output, OutputFormat::Text);
        assert_eq!(config.journalctl, "journalctl");
        assert_eq!(config.snapshot_file, None);
        assert_eq!(config.diagnostics, Diagnostic::ALL.to_vec());
    }

    #[test]
    fn parses_overrides() {
        let config = config_from(&[
            ("DIAG_LOG_LEVEL", "Debug"),
            ("DIAG_OUTPUT", "JSON"),
            ("DIAG_JOURNALCTL", "/usr/bin/journalctl"),
            ("DIAG_SNAPSHOT_FILE", "/tmp/units.json"),
            ("DIAG_DIAGNOSTICS", "UnitStatus, "),
        ])
        .expect("config should parse");

        assert_eq!(config.min_level, Level::Debug);
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.journalctl, "/usr/bin/journalctl");
        assert_eq!(config.snapshot_file, Some(PathBuf::from("/tmp/units.json")));
        assert_eq!(config.diagnostics, vec![Diagnostic::UnitStatus]);
    }

    #[test]
    fn invalid_level_fails() {
        let err = config_from(&[("DIAG_LOG_LEVEL", "loud")]).expect_err("expected level error");
        assert!(matches!(err, ConfigError::InvalidLevel));
    }

    #[test]
    fn invalid_output_fails() {
        let err = config_from(&[("DIAG_OUTPUT", "yaml")]).expect_err("expected output error");
        assert!(matches!(err, ConfigError::InvalidOutput));
    }

    #[test]
    fn blank_journalctl_fails() {
        let err = config_from(&[("DIAG_JOURNALCTL", "  ")]).expect_err("expected empty error");
        assert!(matches!(err, ConfigError::EmptyJournalctl));
    }

    #[test]
    fn unknown_diagnostic_fails() {
        let err = config_from(&[("DIAG_DIAGNOSTICS", "AnalyzeLogs,ConfigContexts")])
            .expect_err("expected unknown diagnostic");
        assert!(matches!(err, ConfigError::UnknownDiagnostic(ref name) if name == "ConfigContexts"));
    }
}
