use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::{DetectionItem, ModelInfoResponse};

use super::annotate;
use super::config::DetectorSettings;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("detector backend error: {0}")]
    Backend(String),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to write annotated image: {0}")]
    Annotation(String),
}

/// Detector output before the vocabulary and confidence floor are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    /// Pixel coordinates `[x1, y1, x2, y2]` in the source image.
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct ModelDescription {
    pub loaded: bool,
    pub backend: &'static str,
    pub source: Option<String>,
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &Path) -> Result<Vec<RawDetection>, InferenceError>;

    fn describe(&self) -> ModelDescription;
}

/// Stand-in used when no model could be set up; every call fails, so uploads degrade.
pub struct DisabledDetector {
    reason: String,
}

impl DisabledDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Detector for DisabledDetector {
    async fn detect(&self, _image: &Path) -> Result<Vec<RawDetection>, InferenceError> {
        Err(InferenceError::ModelUnavailable(self.reason.clone()))
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            loaded: false,
            backend: "disabled",
            source: None,
        }
    }
}

/// Result of a successful inference call.
#[derive(Debug, Clone)]
pub struct Inference {
    /// Sorted by confidence, highest first.
    pub detections: Vec<DetectionItem>,
    pub annotated_filename: Option<String>,
}

#[derive(Clone)]
pub struct DetectionAdapter {
    detector: Arc<dyn Detector>,
    settings: Arc<DetectorSettings>,
    annotated_dir: PathBuf,
    timeout: Duration,
}

impl DetectionAdapter {
    pub fn new(
        detector: Arc<dyn Detector>,
        settings: DetectorSettings,
        annotated_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            detector,
            settings: Arc::new(settings),
            annotated_dir,
            timeout,
        }
    }

    /// Runs detection and annotation under one timeout.
    pub async fn infer(&self, image_path: &Path) -> Result<Inference, InferenceError> {
        tokio::time::timeout(self.timeout, self.run(image_path))
            .await
            .map_err(|_| InferenceError::Timeout(self.timeout))?
    }

    async fn run(&self, image_path: &Path) -> Result<Inference, InferenceError> {
        let raw = self.detector.detect(image_path).await?;

        let detections = self.rank(raw)?;
        log::debug!(
            "{} detection(s) above {:.2} for {}",
            detections.len(),
            self.settings.confidence_threshold,
            image_path.display()
        );

        let annotated_filename = if self.settings.annotate {
            match self.annotate(image_path, &detections).await {
                Ok(name) => Some(name),
                Err(e) => {
                    log::warn!("Skipping annotated image for {}: {}", image_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Inference {
            detections,
            annotated_filename,
        })
    }

    pub fn model_info(&self) -> ModelInfoResponse {
        let description = self.detector.describe();
        ModelInfoResponse {
            status: if description.loaded { "loaded" } else { "not_loaded" }.to_string(),
            backend: description.backend.to_string(),
            source: description.source,
            num_classes: self.settings.classes.len(),
            classes: self.settings.classes.clone(),
        }
    }

    /// Fails on any score outside `[0, 1]` or any non-finite box coordinate.
    fn rank(&self, raw: Vec<RawDetection>) -> Result<Vec<DetectionItem>, InferenceError> {
        if let Some(bad) = raw.iter().find(|d| {
            !(0.0..=1.0).contains(&d.confidence) || d.bbox.iter().any(|v| !v.is_finite())
        }) {
            return Err(InferenceError::Backend(format!(
                "detector returned an invalid detection: class {} confidence {} bbox {:?}",
                bad.class_id, bad.confidence, bad.bbox
            )));
        }

        let floor = self.settings.confidence_threshold;
        let mut detections: Vec<DetectionItem> = raw
            .into_iter()
            .filter(|d| d.confidence >= floor)
            .map(|d| DetectionItem {
                label: self.settings.label_for(d.class_id),
                label_id: d.class_id,
                confidence: round_to(d.confidence as f64, 4),
                bbox: d.bbox.map(|coord| round_to(coord as f64, 2)),
            })
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(detections)
    }

    async fn annotate(
        &self,
        image_path: &Path,
        detections: &[DetectionItem],
    ) -> Result<String, InferenceError> {
        let image_path = image_path.to_path_buf();
        let annotated_dir = self.annotated_dir.clone();
        let detections = detections.to_vec();
        tokio::task::spawn_blocking(move || {
            annotate::save_annotated(&image_path, &detections, &annotated_dir)
        })
        .await
        .map_err(|e| InferenceError::Annotation(e.to_string()))?
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
