//! Leveled, keyed, templated finding emission
//!
//! Every diagnostic funnels its output through a [`LogSink`]. A message is a
//! template plus named fields; templates reference fields as `{{name}}`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn prefix(self) -> &'static str {
        match self {
            Level::Error => "ERROR: ",
            Level::Warn => "WARN: ",
            Level::Info => "Info: ",
            Level::Debug => "debug: ",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            _ => None,
        }
    }
}

/// A message template and the values substituted into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    template: String,
    fields: BTreeMap<&'static str, String>,
}

impl Msg {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.insert(key, value.into());
        self
    }

    pub fn fields(&self) -> &BTreeMap<&'static str, String> {
        &self.fields
    }

    /// Substitutes known fields in one pass. Values are inserted verbatim and
    /// unknown placeholders are kept as written.
    pub fn render(&self) -> String {
        placeholder_regex()
            .replace_all(&self.template, |caps: &Captures<'_>| {
                match self.fields.get(&caps[1]) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex")
    })
}

pub trait LogSink {
    fn emit(&mut self, level: Level, id: &str, msg: Msg);

    fn error(&mut self, id: &str, msg: Msg) {
        self.emit(Level::Error, id, msg);
    }

    fn warn(&mut self, id: &str, msg: Msg) {
        self.emit(Level::Warn, id, msg);
    }

    fn info(&mut self, id: &str, msg: Msg) {
        self.emit(Level::Info, id, msg);
    }

    fn debug(&mut self, id: &str, msg: Msg) {
        self.emit(Level::Debug, id, msg);
    }
}
