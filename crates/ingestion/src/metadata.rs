//! Caller-supplied metadata accompanying an uploaded raster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dss_common::{parse_datetime, DssError, DssResult};

/// Metadata for one raster upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMetadata {
    /// Asset type tag, e.g. "PredictorStack" or "NDVI"
    pub asset_type: String,
    /// Capture time as ISO 8601
    pub captured_at: String,
    #[serde(default)]
    pub crop_id: Option<String>,
    /// Original filename; its stem names the stored artifact
    pub filename: String,
}

impl IngestMetadata {
    pub fn new(
        asset_type: impl Into<String>,
        captured_at: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            asset_type: asset_type.into(),
            captured_at: captured_at.into(),
            crop_id: None,
            filename: filename.into(),
        }
    }

    pub fn with_crop(mut self, crop_id: impl Into<String>) -> Self {
        self.crop_id = Some(crop_id.into());
        self
    }

    /// Validate and return the parsed capture time.
    pub fn validate(&self) -> DssResult<DateTime<Utc>> {
        let asset_type = self.asset_type.trim();
        if asset_type.is_empty() {
            return Err(DssError::Validation("Asset type is required".to_string()));
        }
        if !asset_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DssError::Validation(format!(
                "Asset type '{}' may only contain letters, digits, '_' and '-'",
                asset_type
            )));
        }
        if self.filename.trim().is_empty() {
            return Err(DssError::Validation("Filename is required".to_string()));
        }
        if let Some(crop) = &self.crop_id {
            if crop.trim().is_empty() {
                return Err(DssError::Validation("Crop id is empty".to_string()));
            }
        }
        parse_datetime(&self.captured_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_valid_metadata() {
        let meta = IngestMetadata::new("PredictorStack", "2024-03-15T10:30:00Z", "stack.tif")
            .with_crop("maize");
        assert_eq!(
            meta.validate().unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_metadata() {
        let bad_time = IngestMetadata::new("NDVI", "yesterday", "a.tif");
        assert!(matches!(bad_time.validate(), Err(DssError::Validation(_))));

        let bad_type = IngestMetadata::new("ndvi/../x", "2024-01-01", "a.tif");
        assert!(matches!(bad_type.validate(), Err(DssError::Validation(_))));

        let no_name = IngestMetadata::new("NDVI", "2024-01-01", " ");
        assert!(matches!(no_name.validate(), Err(DssError::Validation(_))));
    }
}
