//! Collected findings and their rendering
//!
//! [`Report`] is the sink used by the binary: it keeps findings in emission
//! order, suppresses exact repeats and renders text or JSON output.

use std::collections::{BTreeMap, HashSet};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::sink::{Level, LogSink, Msg};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub level: Level,
    pub id: String,
    pub text: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Report {
    findings: Vec<Finding>,
    seen: HashSet<(Level, String, String)>,
    duplicates: usize,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn duplicates_suppressed(&self) -> usize {
        self.duplicates
    }

    pub fn count(&self, level: Level) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.level == level)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Level::Error) > 0
    }

    pub fn ids(&self) -> Vec<&str> {
        self.findings.iter().map(|finding| finding.id.as_str()).collect()
    }

    pub fn render_text(&self, min_level: Level) -> String {
        let mut output = String::new();
        for finding in self.visible(min_level) {
            output.push_str(finding.level.prefix());
            output.push('[');
            output.push_str(&finding.id);
            output.push_str("] ");
            output.push_str(finding.text.trim());
            output.push('\n');
        }
        output
    }

    pub fn render_json(&self, min_level: Level) -> Value {
        let findings = self.visible(min_level).collect::<Vec<_>>();
        json!({
            "generated_at_utc": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "findings": findings,
            "summary": {
                "errors": self.count(Level::Error),
                "warnings": self.count(Level::Warn),
                "infos": self.count(Level::Info),
                "debugs": self.count(Level::Debug),
                "duplicates_suppressed": self.duplicates,
            },
        })
    }

    fn visible(&self, min_level: Level) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |finding| finding.level >= min_level)
    }
}

impl LogSink for Report {
    fn emit(&mut self, level: Level, id: &str, msg: Msg) {
        let text = msg.render();
        let key = (level, id.to_string(), text.clone());
        if !self.seen.insert(key) {
            self.duplicates += 1;
            tracing::debug!(id, "duplicate finding suppressed");
            return;
        }

        let fields = msg
            .fields()
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        self.findings.push(Finding {
            level,
            id: id.to_string(),
            text,
            fields,
        });
    }
}
