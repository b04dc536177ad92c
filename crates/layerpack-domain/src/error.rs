use std::path::PathBuf;

/// Failures surfaced while turning a closure into layers.
///
/// Every variant is terminal: callers never receive a partial layer set.
#[derive(Debug, thiserror::Error)]
pub enum LayeringError {
    #[error("malformed {what} in '{}': {source}", file.display())]
    Format {
        what: &'static str,
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dependency graph is inconsistent: {0}")]
    Graph(String),
    #[error("failed to archive '{subject}': {message}")]
    Digest { subject: String, message: String },
    #[error("failed to access '{}': {source}", file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LayeringError {
    pub fn digest(subject: impl Into<String>, message: impl ToString) -> Self {
        Self::Digest {
            subject: subject.into(),
            message: message.to_string(),
        }
    }

    pub fn io(file: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            file: file.into(),
            source,
        }
    }
}

pub type Result<T, E = LayeringError> = std::result::Result<T, E>;
