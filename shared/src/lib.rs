use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Lifecycle state of a report. New reports start as `Pending`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Cleaned,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Cleaned => "cleaned",
        }
    }

    /// Parses user input after trimming and lower-casing it.
    pub fn parse_normalized(raw: &str) -> Option<Self> {
        raw.trim().to_lowercase().parse().ok()
    }

    /// Comma separated list of accepted values, for error messages.
    pub fn allowed_values() -> String {
        ReportStatus::iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One detected object. Serialized with the `class`/`class_id` keys existing clients read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionItem {
    #[serde(rename = "class", alias = "label")]
    pub label: String,
    #[serde(rename = "class_id", alias = "label_id")]
    pub label_id: u32,
    pub confidence: f64,
    /// Pixel coordinates `[x1, y1, x2, y2]`.
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryDetection {
    #[serde(rename = "class", alias = "label")]
    pub label: String,
    pub confidence: f64,
    pub bbox: [f64; 4],
}

/// Stored form of a report's detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionsPayload {
    pub count: usize,
    pub primary: PrimaryDetection,
    pub all: Vec<DetectionItem>,
}

impl DetectionsPayload {
    /// Builds the payload from a list already ranked by confidence. `None` when empty.
    pub fn from_ranked(detections: &[DetectionItem]) -> Option<Self> {
        let first = detections.first()?;
        Some(Self {
            count: detections.len(),
            primary: PrimaryDetection {
                label: first.label.clone(),
                confidence: first.confidence,
                bbox: first.bbox,
            },
            all: detections.to_vec(),
        })
    }
}

/// Truncated detection list returned to uploaders; `count` is the full total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionsPreview {
    pub count: usize,
    pub items: Vec<DetectionItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub report_id: i64,
    pub prediction: String,
    pub confidence: Option<f64>,
    pub image_path: String,
    pub boxed_image_path: Option<String>,
    pub detections: Option<DetectionsPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: i64,
    pub image_path: Option<String>,
    pub boxed_image_path: Option<String>,
    pub prediction: Option<String>,
    pub confidence: Option<f64>,
    pub status: ReportStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateResponse {
    pub success: bool,
    pub report_id: i64,
    pub status: ReportStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFilterResponse {
    pub status_filter: ReportStatus,
    pub count: usize,
    pub reports: Vec<ReportSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStats {
    pub total: i64,
    pub pending: i64,
    pub cleaned: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub status: String,
    pub backend: String,
    pub source: Option<String>,
    pub num_classes: usize,
    pub classes: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
