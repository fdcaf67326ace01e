use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagError {
    #[error("log source for unit {unit} unavailable: {message}")]
    LogSource { unit: String, message: String },
    #[error("unit snapshot unavailable: {0}")]
    Snapshot(String),
    #[error("invalid pattern for rule {id}")]
    InvalidPattern {
        id: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl DiagError {
    pub fn log_source(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LogSource {
            unit: unit.into(),
            message: message.into(),
        }
    }

    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot(message.into())
    }

    /// Renders the error together with its kind, for inclusion in findings.
    pub fn describe(&self) -> String {
        let kind = match self {
            Self::LogSource { .. } => "log_source",
            Self::Snapshot(_) => "snapshot",
            Self::InvalidPattern { .. } => "invalid_pattern",
        };
        format!("({kind}) {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::DiagError;

    #[test]
    fn describe_includes_kind_and_message() {
        let err = DiagError::log_source("docker", "No such file or directory");
        assert_eq!(
            err.describe(),
            "(log_source) log source for unit docker unavailable: No such file or directory"
        );
    }
}
