//! The named diagnostics a run can execute

use std::fmt;

use tracing::info;

use crate::domain::catalog::Catalog;
use crate::domain::dependencies::check_unit_status;
use crate::domain::scanner::match_logs_since_last_start;
use crate::journal::LogSource;
use crate::sink::{LogSink, Msg};
use crate::systemd_client::UnitSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    AnalyzeLogs,
    UnitStatus,
}

impl Diagnostic {
    pub const ALL: [Diagnostic; 2] = [Diagnostic::AnalyzeLogs, Diagnostic::UnitStatus];

    pub fn name(self) -> &'static str {
        match self {
            Diagnostic::AnalyzeLogs => "AnalyzeLogs",
            Diagnostic::UnitStatus => "UnitStatus",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Diagnostic::AnalyzeLogs => {
                "Check for problems in systemd service logs since each service last started"
            }
            Diagnostic::UnitStatus => "Check status for OpenShift-related systemd units",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|diagnostic| diagnostic.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a diagnostic run needs to know about the host.
pub struct Environment<'a, S> {
    pub has_systemd: bool,
    pub units: &'a UnitSnapshot,
    pub log_source: &'a S,
}

impl<S> Environment<'_, S> {
    fn skip_reason(&self) -> Option<&'static str> {
        (!self.has_systemd).then_some("systemd is not present on this host")
    }
}

pub fn run_diagnostics<S: LogSource>(
    diagnostics: &[Diagnostic],
    catalog: &Catalog,
    env: &Environment<'_, S>,
    sink: &mut dyn LogSink,
) {
    for diagnostic in diagnostics {
        if let Some(reason) = env.skip_reason() {
            sink.info(
                "diagSkipped",
                Msg::new(
                    "Skipping diagnostic: {{name}}\nDescription: {{description}}\nBecause: {{reason}}",
                )
                .with("name", diagnostic.name())
                .with("description", diagnostic.description())
                .with("reason", reason),
            );
            continue;
        }

        info!(diagnostic = %diagnostic, "running diagnostic");
        match diagnostic {
            Diagnostic::AnalyzeLogs => analyze_logs(catalog, env, sink),
            Diagnostic::UnitStatus => check_unit_status(sink, env.units, &catalog.dependencies),
        }
    }
}

fn analyze_logs<S: LogSource>(catalog: &Catalog, env: &Environment<'_, S>, sink: &mut dyn LogSink) {
    for unit in &catalog.units {
        let state = env.units.get(unit.name);
        if !(state.enabled || state.active) {
            continue;
        }

        sink.info(
            "sdCheckLogs",
            Msg::new("Checking journalctl logs for '{{name}}' service").with("name", unit.name),
        );
        if unit.matchers.is_empty() {
            continue;
        }
        match_logs_since_last_start(env.log_source, unit, sink);
    }
}
