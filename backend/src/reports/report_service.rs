use std::sync::Arc;

use shared::{
    DetectionItem, DetectionsPayload, DetectionsPreview, ModelInfoResponse, ReportStats,
    ReportSummary, StatusFilterResponse, StatusUpdateResponse, UploadResponse,
};

use crate::db::report_repository::{
    parse_status, BoundingArea, GeoPoint, NewReport, Report, ReportRepository, RepositoryError,
};
use crate::detector::model::{DetectionAdapter, Inference, InferenceError};
use crate::error::ApiError;
use crate::storage::image_storage::{
    annotated_url, is_accepted_image, upload_url, ImageStorage, StorageError,
};

pub const PREDICTION_PENDING: &str = "pending";
pub const PREDICTION_NONE: &str = "No Waste Detected";
pub const MAX_PREVIEW_DETECTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Optional descriptive fields sent alongside an upload. Accepted but not stored.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub category: Option<String>,
    pub severity: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub image: UploadedImage,
    pub location: GeoPoint,
    pub metadata: UploadMetadata,
}

/// Prediction columns derived from one inference attempt.
#[derive(Debug, Clone, PartialEq)]
struct PredictionFields {
    prediction: String,
    confidence: Option<f64>,
    boxed_filename: Option<String>,
    detections: Vec<DetectionItem>,
}

impl PredictionFields {
    fn from_outcome(outcome: Result<Inference, InferenceError>) -> Self {
        match outcome {
            Ok(inference) => {
                let (prediction, confidence) = match inference.detections.first() {
                    Some(top) => (top.label.clone(), Some(top.confidence)),
                    None => (PREDICTION_NONE.to_string(), Some(0.0)),
                };
                Self {
                    prediction,
                    confidence,
                    boxed_filename: inference.annotated_filename,
                    detections: inference.detections,
                }
            }
            Err(e) => {
                log::warn!("Inference failed, storing report as pending: {}", e);
                Self {
                    prediction: PREDICTION_PENDING.to_string(),
                    confidence: None,
                    boxed_filename: None,
                    detections: Vec::new(),
                }
            }
        }
    }
}

pub fn summarize_report(report: &Report) -> ReportSummary {
    ReportSummary {
        id: report.id,
        image_path: Some(upload_url(&report.image_path)),
        boxed_image_path: report.boxed_image_path.as_deref().map(annotated_url),
        prediction: report.prediction.clone(),
        confidence: report.confidence,
        status: report.status,
        latitude: report.location.latitude,
        longitude: report.location.longitude,
        created_at: report.created_at,
    }
}

fn summarize_all(reports: &[Report]) -> Vec<ReportSummary> {
    reports.iter().map(summarize_report).collect()
}

#[derive(Clone)]
pub struct ReportService {
    repository: Arc<dyn ReportRepository>,
    storage: ImageStorage,
    detector: DetectionAdapter,
}

impl ReportService {
    pub fn new(
        repository: Arc<dyn ReportRepository>,
        storage: ImageStorage,
        detector: DetectionAdapter,
    ) -> Self {
        Self {
            repository,
            storage,
            detector,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.storage.max_bytes()
    }

    pub fn upload_too_large(&self) -> StorageError {
        self.storage.too_large()
    }

    /// Stores the photo, runs detection and records the report. Inference problems never
    /// fail the upload; the report is stored as pending instead.
    pub async fn handle_upload(&self, request: UploadRequest) -> Result<UploadResponse, ApiError> {
        let image = request.image;
        if !is_accepted_image(image.content_type.as_deref(), image.filename.as_deref()) {
            return Err(StorageError::InvalidFormat.into());
        }

        let metadata = &request.metadata;
        log::debug!(
            "Upload metadata: category={:?} severity={:?} title={:?} description={:?}",
            metadata.category,
            metadata.severity,
            metadata.title,
            metadata.description
        );

        let stored = self.storage.save(image.filename.as_deref(), &image.bytes).await?;
        let fields = PredictionFields::from_outcome(self.detector.infer(&stored.path).await);

        let created = self
            .repository
            .create(NewReport {
                image_path: stored.filename.clone(),
                boxed_image_path: fields.boxed_filename.clone(),
                prediction: fields.prediction.clone(),
                confidence: fields.confidence,
                detections: DetectionsPayload::from_ranked(&fields.detections),
                location: request.location,
            })
            .await;
        let report = match created {
            Ok(report) => report,
            Err(e) => {
                self.storage
                    .discard(&stored, fields.boxed_filename.as_deref())
                    .await;
                return Err(e.into());
            }
        };

        log::info!(
            "Stored report {} ({}) at {:.5},{:.5}",
            report.id,
            fields.prediction,
            request.location.latitude,
            request.location.longitude
        );

        let detections = if fields.detections.is_empty() {
            None
        } else {
            Some(DetectionsPreview {
                count: fields.detections.len(),
                items: fields
                    .detections
                    .iter()
                    .take(MAX_PREVIEW_DETECTIONS)
                    .cloned()
                    .collect(),
            })
        };

        Ok(UploadResponse {
            success: true,
            report_id: report.id,
            prediction: fields.prediction,
            confidence: fields.confidence,
            image_path: upload_url(&stored.filename),
            boxed_image_path: fields.boxed_filename.as_deref().map(annotated_url),
            detections,
        })
    }

    pub async fn list_reports(&self, skip: i64, limit: i64) -> Result<Vec<ReportSummary>, ApiError> {
        let reports = self.repository.list(skip, limit).await?;
        Ok(summarize_all(&reports))
    }

    pub async fn get_report(&self, id: i64) -> Result<ReportSummary, ApiError> {
        match self.repository.get(id).await? {
            Some(report) => Ok(summarize_report(&report)),
            None => Err(RepositoryError::NotFound(id).into()),
        }
    }

    pub async fn reports_in_area(&self, area: BoundingArea) -> Result<Vec<ReportSummary>, ApiError> {
        let reports = self.repository.list_in_area(area).await?;
        Ok(summarize_all(&reports))
    }

    pub async fn reports_by_status(
        &self,
        raw_status: &str,
        skip: i64,
        limit: i64,
    ) -> Result<StatusFilterResponse, ApiError> {
        let status = parse_status(raw_status)?;
        let reports = self.repository.list_by_status(status, skip, limit).await?;
        Ok(StatusFilterResponse {
            status_filter: status,
            count: reports.len(),
            reports: summarize_all(&reports),
        })
    }

    /// Validates the status before looking the report up, so a bad value is a 400 even
    /// for unknown ids.
    pub async fn update_status(&self, id: i64, raw_status: &str) -> Result<StatusUpdateResponse, ApiError> {
        let status = parse_status(raw_status)?;
        let report = self
            .repository
            .update_status(id, status)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;

        log::info!("Report {} marked {}", report.id, status);
        Ok(StatusUpdateResponse {
            success: true,
            report_id: report.id,
            status,
            message: format!("Report status updated to '{}'", status),
        })
    }

    pub async fn stats(&self) -> Result<ReportStats, ApiError> {
        Ok(self.repository.count_by_status().await?)
    }

    pub fn model_info(&self) -> ModelInfoResponse {
        self.detector.model_info()
    }
}
