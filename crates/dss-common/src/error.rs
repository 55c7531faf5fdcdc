//! Error types for the decision-support crates.

use std::fmt;

use thiserror::Error;

/// Result type alias using DssError.
pub type DssResult<T> = Result<T, DssError>;

/// Primary error type shared by ingestion, cataloging and prediction.
#[derive(Debug, Error)]
pub enum DssError {
    // === Input Errors ===
    #[error("Invalid input: {0}")]
    Validation(String),

    // === Raster Errors ===
    #[error("Raster conversion failed: {0}")]
    Conversion(String),

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    /// Target bucket or root directory does not exist yet.
    #[error("Storage container missing: {0}")]
    ContainerMissing(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    // === Prediction Errors ===
    #[error("Feature extraction failed: {0}")]
    Extraction(String),

    #[error("Ensemble prediction failed: {0}")]
    Ensemble(String),
}

/// Stable error category reported alongside the human-readable detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    Conversion,
    Storage,
    Catalog,
    Extraction,
    Ensemble,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::Conversion => "ConversionError",
            ErrorCategory::Storage => "StorageError",
            ErrorCategory::Catalog => "CatalogError",
            ErrorCategory::Extraction => "ExtractionError",
            ErrorCategory::Ensemble => "EnsembleError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DssError {
    /// Get the stable category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DssError::Validation(_) => ErrorCategory::Validation,
            DssError::Conversion(_) => ErrorCategory::Conversion,
            DssError::Storage(_) | DssError::ContainerMissing(_) => ErrorCategory::Storage,
            DssError::Catalog(_) => ErrorCategory::Catalog,
            DssError::Extraction(_) => ErrorCategory::Extraction,
            DssError::Ensemble(_) => ErrorCategory::Ensemble,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    ///
    /// Malformed input and corrupt rasters fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DssError::Storage(_) | DssError::ContainerMissing(_) | DssError::Catalog(_)
        )
    }

    /// Human-readable detail without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            DssError::Validation(s)
            | DssError::Conversion(s)
            | DssError::Storage(s)
            | DssError::ContainerMissing(s)
            | DssError::Catalog(s)
            | DssError::Extraction(s)
            | DssError::Ensemble(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_missing_is_a_storage_failure() {
        let err = DssError::ContainerMissing("bucket crop-data".to_string());
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.category().as_str(), "StorageError");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_is_not_retryable() {
        let err = DssError::Validation("latitude out of range".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.detail(), "latitude out of range");
        assert_eq!(err.to_string(), "Invalid input: latitude out of range");
    }
}
