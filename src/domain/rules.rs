//! Rule model for log diagnostics
//!
//! A [`LogMatcher`] pairs a pattern with either a static interpretation or a
//! custom [`Interpret`] implementation. A [`UnitSpec`] lists the matchers for
//! one unit in the order they are tried.

use std::fmt;
use std::rc::Rc;

use regex::{Captures, Regex};

use crate::errors::DiagError;
use crate::journal::LogEntry;
use crate::sink::{Level, LogSink};

/// Passed to custom interpreters on every match.
pub struct ScanContext<'a> {
    pub unit: &'a str,
    pub sink: &'a mut dyn LogSink,
}

/// Custom match handling. Implementations may hold their own state, which
/// lives as long as the catalog that owns them.
pub trait Interpret {
    /// Returns whether the matcher stays active for the rest of the scan.
    fn interpret(
        &self,
        ctx: &mut ScanContext<'_>,
        entry: &LogEntry,
        captures: &Captures<'_>,
    ) -> bool;
}

#[derive(Clone)]
pub enum Interpretation {
    Static {
        level: Level,
        id: &'static str,
        text: &'static str,
        keep_after_match: bool,
    },
    Custom(Rc<dyn Interpret>),
}

impl fmt::Debug for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpretation::Static {
                level,
                id,
                keep_after_match,
                ..
            } => f
                .debug_struct("Static")
                .field("level", level)
                .field("id", id)
                .field("keep_after_match", keep_after_match)
                .finish(),
            Interpretation::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogMatcher {
    pub pattern: Regex,
    pub interpretation: Interpretation,
}

impl LogMatcher {
    /// A matcher reported once per scan.
    pub fn once(
        pattern: &str,
        level: Level,
        id: &'static str,
        text: &'static str,
    ) -> Result<Self, DiagError> {
        Ok(Self {
            pattern: compile(id, pattern)?,
            interpretation: Interpretation::Static {
                level,
                id,
                text,
                keep_after_match: false,
            },
        })
    }

    /// A matcher reported on every matching entry.
    pub fn repeating(
        pattern: &str,
        level: Level,
        id: &'static str,
        text: &'static str,
    ) -> Result<Self, DiagError> {
        let mut matcher = Self::once(pattern, level, id, text)?;
        if let Interpretation::Static {
            keep_after_match, ..
        } = &mut matcher.interpretation
        {
            *keep_after_match = true;
        }
        Ok(matcher)
    }

    pub fn custom(
        pattern: &str,
        id: &'static str,
        interpreter: Rc<dyn Interpret>,
    ) -> Result<Self, DiagError> {
        Ok(Self {
            pattern: compile(id, pattern)?,
            interpretation: Interpretation::Custom(interpreter),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub name: &'static str,
    pub start_boundary: Regex,
    pub matchers: Vec<LogMatcher>,
}

impl UnitSpec {
    pub fn new(
        name: &'static str,
        start_boundary: &str,
        matchers: Vec<LogMatcher>,
    ) -> Result<Self, DiagError> {
        Ok(Self {
            name,
            start_boundary: compile(name, start_boundary)?,
            matchers,
        })
    }
}

fn compile(id: &'static str, pattern: &str) -> Result<Regex, DiagError> {
    Regex::new(pattern).map_err(|source| DiagError::InvalidPattern { id, source })
}
