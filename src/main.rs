use std::process::ExitCode;

use openshift_unit_diagnostics::{
    config::{Config, OutputFormat},
    exit_code, logging, run, unit_provider,
};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let provider = unit_provider(&config);

    let outcome = run(&config, provider.as_ref()).await;
    let report = match &outcome {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "diagnostics could not run");
            return Ok(exit_code(&outcome));
        }
    };

    match config.output {
        OutputFormat::Text => print!("{}", report.render_text(config.min_level)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report.render_json(config.min_level))?
        ),
    }

    info!(
        findings = report.findings().len(),
        duplicates = report.duplicates_suppressed(),
        "diagnostics complete"
    );

    Ok(exit_code(&outcome))
}
