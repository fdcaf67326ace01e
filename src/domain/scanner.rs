//! Scans a unit's journal backwards to its most recent start
//!
//! Records are read newest first. Scanning stops at the start boundary, when
//! every matcher has retired, or at the end of the stream.

use tracing::debug;

use crate::domain::rules::{Interpretation, LogMatcher, ScanContext, UnitSpec};
use crate::errors::DiagError;
use crate::journal::{parse_log_entry, LogEntry, LogSource};
use crate::sink::{Level, LogSink, Msg};

const FOUND_PRELUDE: &str = "Found '{{unit}}' journald log message:\n  {{logMsg}}\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StartBoundary,
    RulesExhausted,
    EndOfStream,
    SourceFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub lines_read: usize,
    pub matches: usize,
    pub stop: StopReason,
}

pub fn match_logs_since_last_start<S: LogSource>(
    source: &S,
    unit: &UnitSpec,
    sink: &mut dyn LogSink,
) -> ScanSummary {
    let summary = match source.open(unit.name) {
        Ok(stream) => scan_stream(unit, stream, sink),
        Err(err) => {
            report_read_error(sink, unit.name, &err);
            ScanSummary {
                lines_read: 0,
                matches: 0,
                stop: StopReason::SourceFailed,
            }
        }
    };

    debug!(
        unit = unit.name,
        lines_read = summary.lines_read,
        matches = summary.matches,
        stop = ?summary.stop,
        "log scan finished"
    );
    summary
}

fn scan_stream<I>(unit: &UnitSpec, mut stream: I, sink: &mut dyn LogSink) -> ScanSummary
where
    I: Iterator<Item = std::io::Result<Vec<u8>>>,
{
    let mut remaining: Vec<&LogMatcher> = unit.matchers.iter().collect();
    let mut summary = ScanSummary {
        lines_read: 0,
        matches: 0,
        stop: StopReason::EndOfStream,
    };

    loop {
        if remaining.is_empty() {
            summary.stop = StopReason::RulesExhausted;
            break;
        }

        let line = match stream.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                let err = DiagError::log_source(unit.name, err.to_string());
                report_read_error(sink, unit.name, &err);
                summary.stop = StopReason::SourceFailed;
                break;
            }
            None => break,
        };
        summary.lines_read += 1;

        let entry = match parse_log_entry(&line) {
            Ok(entry) => entry,
            Err(err) => {
                sink.debug(
                    "sdLogBadJSON",
                    Msg::new(
                        "Couldn't read the JSON for this log message:\n{{message}}\nGot error {{error}}",
                    )
                    .with("message", String::from_utf8_lossy(&line))
                    .with("error", err.to_string()),
                );
                continue;
            }
        };

        if unit.start_boundary.is_match(&entry.message) {
            summary.stop = StopReason::StartBoundary;
            break;
        }

        if apply_first_match(unit, &mut remaining, &entry, sink) {
            summary.matches += 1;
        }
    }

    summary
}

/// Applies the first matching rule to `entry`, retiring it unless it asks to
/// stay. Returns whether any rule matched.
fn apply_first_match(
    unit: &UnitSpec,
    remaining: &mut Vec<&LogMatcher>,
    entry: &LogEntry,
    sink: &mut dyn LogSink,
) -> bool {
    let hit = remaining.iter().enumerate().find_map(|(index, matcher)| {
        matcher
            .pattern
            .captures(&entry.message)
            .map(|captures| (index, captures))
    });
    let Some((index, captures)) = hit else {
        return false;
    };

    let matcher = remaining[index];
    let keep = match &matcher.interpretation {
        Interpretation::Custom(interpreter) => {
            let mut ctx = ScanContext {
                unit: unit.name,
                sink: &mut *sink,
            };
            interpreter.interpret(&mut ctx, entry, &captures)
        }
        Interpretation::Static {
            level,
            id,
            text,
            keep_after_match,
        } => {
            sink.emit(
                *level,
                id,
                Msg::new(format!("{FOUND_PRELUDE}{text}"))
                    .with("unit", unit.name)
                    .with("logMsg", entry.message.as_str()),
            );
            *keep_after_match
        }
    };

    if !keep {
        remaining.remove(index);
    }
    true
}

fn report_read_error(sink: &mut dyn LogSink, unit: &str, err: &DiagError) {
    sink.emit(
        Level::Error,
        "sdLogReadErr",
        Msg::new(
            "\nDiagnostics failed to query journalctl for the '{{unit}}' unit logs.\n\
             This should be very unusual, so please report this error:\n{{error}}",
        )
        .with("unit", unit)
        .with("error", err.describe()),
    );
}
