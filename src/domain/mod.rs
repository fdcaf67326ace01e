//! Diagnostic rules, the journal scanner and unit dependency checks
//!
//! Provides the core of the OpenShift host diagnostics: the rule catalog and the
//! engines that evaluate it against a unit snapshot and the journal.

pub mod catalog;
pub mod dependencies;
pub mod diagnostics;
pub mod rules;
pub mod scanner;
