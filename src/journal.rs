//! Journal access for the log scanner
//!
//! A [`LogSource`] opens a stream of raw journal records for one unit, most
//! recent first. [`JournalctlSource`] streams them from a `journalctl` child
//! process; the child is reaped when the stream is dropped.

use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::DiagError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct JournalRawLogEntry {
    #[serde(rename = "MESSAGE")]
    message: JournalMessage,
}

/// see journalctl(1) json format
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JournalMessage {
    String(String),
    Bytes(Vec<u8>),
    Multiple(Vec<JournalMessage>),
}

impl fmt::Display for JournalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalMessage::String(s) => s.fmt(f),
            JournalMessage::Bytes(b) => String::from_utf8_lossy(b).fmt(f),
            JournalMessage::Multiple(messages) => {
                for (index, message) in messages.iter().enumerate() {
                    if index > 0 {
                        ";".fmt(f)?;
                    }
                    message.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

/// Parses one raw record. Bytes that are not valid UTF-8 are a parse error.
pub fn parse_log_entry(line: &[u8]) -> Result<LogEntry, serde_json::Error> {
    let raw: JournalRawLogEntry = serde_json::from_slice(line)?;
    Ok(LogEntry {
        message: raw.message.to_string(),
    })
}

pub trait LogSource {
    type Stream: Iterator<Item = io::Result<Vec<u8>>>;

    /// Opens the unit's records newest first, one raw JSON record per item.
    fn open(&self, unit: &str) -> Result<Self::Stream, DiagError>;
}

#[derive(Debug, Clone)]
pub struct JournalctlSource {
    program: String,
}

impl JournalctlSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl LogSource for JournalctlSource {
    type Stream = JournalStream;

    fn open(&self, unit: &str) -> Result<JournalStream, DiagError> {
        let mut child = Command::new(&self.program)
            .arg("-r")
            .arg("-u")
            .arg(unit)
            .arg("--output=json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| DiagError::log_source(unit, err.to_string()))?;

        let Some(stdout) = child.stdout.take() else {
            reap(unit, &mut child);
            return Err(DiagError::log_source(unit, "stdout was not piped"));
        };

        debug!(unit, program = %self.program, pid = child.id(), "journal reader started");
        Ok(JournalStream {
            unit: unit.to_string(),
            reader: Some(BufReader::new(stdout)),
            child,
        })
    }
}

pub struct JournalStream {
    unit: String,
    reader: Option<BufReader<ChildStdout>>,
    child: Child,
}

impl Iterator for JournalStream {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with(b"\n") {
                    line.pop();
                    if line.ends_with(b"\r") {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl Drop for JournalStream {
    fn drop(&mut self) {
        // close our end first so a blocked writer sees EPIPE
        self.reader = None;
        reap(&self.unit, &mut self.child);
    }
}

fn reap(unit: &str, child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = child.kill();
            if let Err(err) = child.wait() {
                warn!(unit, error = %err, "failed to reap journal reader");
            }
        }
        Err(err) => warn!(unit, error = %err, "failed to query journal reader status"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use super::{parse_log_entry, JournalctlSource, LogSource};
    use crate::domain::rules::{LogMatcher, UnitSpec};
    use crate::domain::scanner::{match_logs_since_last_start, StopReason};
    use crate::errors::DiagError;
    use crate::report::Report;
    use crate::sink::Level;

    #[test]
    fn parses_string_message() {
        let entry = parse_log_entry(br#"{"MESSAGE":"Starting Open vSwitch","PRIORITY":"6"}"#)
            .expect("valid record");
        assert_eq!(entry.message, "Starting Open vSwitch");
    }

    #[test]
    fn parses_byte_array_message() {
        let entry = parse_log_entry(br#"{"MESSAGE":[104,105]}"#).expect("valid record");
        assert_eq!(entry.message, "hi");
    }

    #[test]
    fn joins_repeated_message_fields() {
        let entry = parse_log_entry(br#"{"MESSAGE":["a","b"]}"#).expect("valid record");
        assert_eq!(entry.message, "a;b");
    }

    #[test]
    fn rejects_record_without_message() {
        assert!(parse_log_entry(br#"{"PRIORITY":"3"}"#).is_err());
        assert!(parse_log_entry(b"not json").is_err());
        assert!(parse_log_entry(b"{\"MESSAGE\":\"bad \xff bytes\"}").is_err());
    }

    #[test]
    fn missing_program_is_log_source_error() {
        let source = JournalctlSource::new("/nonexistent/journalctl-for-tests");
        let err = source.open("docker").err().expect("spawn should fail");
        assert!(matches!(err, DiagError::LogSource { ref unit, .. } if unit == "docker"));
    }

    /// Writes an executable stand-in for journalctl that records its pid and
    /// arguments, prints `body`, then blocks until killed.
    fn fake_journalctl(name: &str, body: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "unit-diagnostics-{name}-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        let script = dir.join("journalctl");
        let record = dir.join("invocation");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$$ $*\" > '{}'\n{body}exec sleep 600\n",
                record.display()
            ),
        )
        .expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod script");
        (script, record)
    }

    fn docker_unit() -> UnitSpec {
        UnitSpec::new(
            "docker",
            "Starting Docker Application Container Engine.",
            vec![LogMatcher::repeating(
                r#"(^|\s)level="fatal"\s"#,
                Level::Error,
                "sdLogDfatal",
                "fatal",
            )
            .expect("valid")],
        )
        .expect("valid unit")
    }

    #[test]
    fn reader_is_reaped_after_boundary_stop() {
        let (script, record) = fake_journalctl(
            "boundary",
            "printf '{\"MESSAGE\":\"bad \\377 bytes\"}\\n'\n\
             printf '%s\\n' '{\"MESSAGE\":\"time=x level=\\\"fatal\\\" msg=boom\"}'\n\
             printf '%s\\n' '{\"MESSAGE\":\"Starting Docker Application Container Engine.\"}'\n",
        );
        let source = JournalctlSource::new(script.to_string_lossy());
        let mut report = Report::new();

        let summary = match_logs_since_last_start(&source, &docker_unit(), &mut report);

        assert_eq!(summary.stop, StopReason::StartBoundary);
        assert_eq!(summary.lines_read, 3);
        assert_eq!(report.ids(), vec!["sdLogBadJSON", "sdLogDfatal"]);
        assert_eq!(report.findings()[0].level, Level::Debug);

        let invocation = fs::read_to_string(&record).expect("script ran");
        let (pid, args) = invocation.trim().split_once(' ').expect("pid and args");
        assert_eq!(args, "-r -u docker --output=json");
        assert!(!Path::new(&format!("/proc/{pid}")).exists());

        let _ = fs::remove_dir_all(script.parent().expect("temp dir"));
    }
}
