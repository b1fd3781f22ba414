//! Error types for the apksign core library.

use thiserror::Error;

use crate::models::Stage;

/// Core error type for APK signing.
#[derive(Error, Debug)]
pub enum ApksignError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Alignment failed: {0}")]
    Alignment(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch {tool}: {source}")]
    Tool {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ApksignError>,
    },
}

/// Broad classification of an [`ApksignError`], independent of stage wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Credential,
    Alignment,
    Signing,
    Io,
    Configuration,
}

impl ApksignError {
    /// Wraps this error with the identity of the pipeline stage that produced it.
    ///
    /// An error that already carries a stage keeps its original one.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            ApksignError::Stage { .. } => self,
            other => ApksignError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage that failed, if the error was raised inside the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ApksignError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Classifies the error, looking through stage wrapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApksignError::Credential(_) => ErrorKind::Credential,
            ApksignError::Alignment(_) => ErrorKind::Alignment,
            ApksignError::Signing(_) => ErrorKind::Signing,
            ApksignError::Io(_) | ApksignError::Tool { .. } => ErrorKind::Io,
            ApksignError::Configuration(_) => ErrorKind::Configuration,
            ApksignError::Stage { source, .. } => source.kind(),
        }
    }
}

impl From<zip::result::ZipError> for ApksignError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ApksignError::Io(e),
            other => ApksignError::Alignment(other.to_string()),
        }
    }
}

/// Result type alias for apksign operations.
pub type Result<T> = std::result::Result<T, ApksignError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_stage() {
        let err = ApksignError::Credential("bad password".to_string()).in_stage(Stage::V1Sign);
        assert_eq!(err.kind(), ErrorKind::Credential);
        assert_eq!(err.stage(), Some(Stage::V1Sign));
        assert_eq!(
            err.to_string(),
            "v1-sign stage failed: Credential error: bad password"
        );
    }

    #[test]
    fn test_in_stage_keeps_first_stage() {
        let err = ApksignError::Alignment("truncated".to_string())
            .in_stage(Stage::Align)
            .in_stage(Stage::FullSign);
        assert_eq!(err.stage(), Some(Stage::Align));
    }

    #[test]
    fn test_tool_error_is_io() {
        let err = ApksignError::Tool {
            tool: "apksigner".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_zip_error_maps_to_alignment() {
        let err: ApksignError = zip::result::ZipError::InvalidArchive("bad eocd".into()).into();
        assert_eq!(err.kind(), ErrorKind::Alignment);
    }
}
