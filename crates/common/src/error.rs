//! Error types shared across Cap export crates.

use std::path::PathBuf;

/// Top-level error type for export operations.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// User-initiated or gating-initiated stop. Never shown to the user.
    #[error("Export cancelled")]
    Cancelled,

    #[error("Preview error: {message}")]
    Preview { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Backend command failed: {message}")]
    Backend { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("You need to sign in to share recordings")]
    NotAuthenticated,

    #[error("Failed to check your subscription status")]
    PlanCheckFailed,

    #[error("Upgrade required to share recordings longer than 5 minutes")]
    UpgradeRequired,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

impl ExportError {
    pub fn preview(msg: impl Into<String>) -> Self {
        Self::Preview {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error ends a job without a user-facing dialog.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_cancellation_is_silent() {
        assert!(ExportError::Cancelled.is_silent());
        assert!(!ExportError::render("boom").is_silent());
        assert!(!ExportError::UpgradeRequired.is_silent());
    }

    #[test]
    fn test_upload_sentinels_have_distinct_messages() {
        let messages = [
            ExportError::NotAuthenticated.to_string(),
            ExportError::PlanCheckFailed.to_string(),
            ExportError::UpgradeRequired.to_string(),
        ];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(messages[0], messages[2]);
        assert!(messages[2].to_lowercase().contains("upgrade required"));
    }
}
