use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MoodboardError>;

/// Errors surfaced to whoever drives a generation or edit.
///
/// Configuration and validation failures never reach the image API.
#[derive(Error, Debug)]
pub enum MoodboardError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("The model did not return any image data. Please try again.")]
    UpstreamEmpty,

    #[error("Image file not found. Tried to locate: {}", path.display())]
    ResourceNotFound { path: PathBuf },

    #[error("image error: {0}")]
    Image(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl MoodboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::ResourceNotFound { path: path.into() }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamEmpty | Self::Upstream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::MoodboardError;

    #[test]
    fn not_found_reports_attempted_path() {
        let err = MoodboardError::not_found("outputs/generated_x.png");
        assert_eq!(
            err.to_string(),
            "Image file not found. Tried to locate: outputs/generated_x.png"
        );
    }

    #[test]
    fn only_upstream_failures_are_retryable() {
        assert!(MoodboardError::UpstreamEmpty.is_retryable());
        assert!(MoodboardError::Upstream(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!MoodboardError::validation("empty").is_retryable());
        assert!(!MoodboardError::configuration("no key").is_retryable());
    }
}
