pub mod config;
pub mod domain;
pub mod errors;
pub mod journal;
pub mod logging;
pub mod report;
pub mod sink;
pub mod systemd_client;

use std::process::ExitCode;

use config::Config;
use domain::{
    catalog::Catalog,
    diagnostics::{run_diagnostics, Environment},
};
use errors::DiagError;
use journal::JournalctlSource;
use report::Report;
use systemd_client::{
    systemd_present, DbusSystemdClient, FileSnapshotProvider, UnitProvider, UnitSnapshot,
};

pub fn unit_provider(config: &Config) -> Box<dyn UnitProvider> {
    match &config.snapshot_file {
        Some(path) => Box::new(FileSnapshotProvider::new(path.clone())),
        None => Box::new(DbusSystemdClient::new()),
    }
}

/// Runs the configured diagnostics once and returns everything they found.
pub async fn run(config: &Config, provider: &dyn UnitProvider) -> Result<Report, DiagError> {
    let catalog = Catalog::build()?;
    let has_systemd = config.snapshot_file.is_some() || systemd_present();

    let units = if has_systemd {
        provider.unit_snapshot(&catalog.known_units()).await?
    } else {
        UnitSnapshot::new()
    };
    tracing::info!(units = units.iter().count(), has_systemd, "unit snapshot loaded");

    let log_source = JournalctlSource::new(config.journalctl.clone());
    let env = Environment {
        has_systemd,
        units: &units,
        log_source: &log_source,
    };

    let mut report = Report::new();
    run_diagnostics(&config.diagnostics, &catalog, &env, &mut report);
    Ok(report)
}

/// Fails when the run could not complete or recorded any Error finding.
pub fn exit_code(outcome: &Result<Report, DiagError>) -> ExitCode {
    match outcome {
        Ok(report) if !report.has_errors() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
