pub mod annotate;
pub mod config;
pub mod model;
pub mod postprocess;
pub mod preprocess;
pub mod remote;
#[cfg(feature = "torch")]
pub mod torch;

use std::sync::Arc;

use crate::config::{AppConfig, DetectorBackend};
use model::{Detector, DisabledDetector, InferenceError};

/// Sets up the configured backend. A backend that cannot be initialised is replaced by a
/// [`DisabledDetector`], so the server still accepts uploads and stores them as pending.
pub fn build_detector(config: &AppConfig) -> Arc<dyn Detector> {
    match try_build_detector(config) {
        Ok(detector) => detector,
        Err(e) => {
            log::error!("Detector unavailable, uploads will be stored as pending: {}", e);
            Arc::new(DisabledDetector::new(e.to_string()))
        }
    }
}

fn try_build_detector(config: &AppConfig) -> Result<Arc<dyn Detector>, InferenceError> {
    match config.detector_backend {
        DetectorBackend::Http => {
            log::info!("Using remote detector at {}", config.detector_url);
            let detector =
                remote::RemoteDetector::new(config.detector_url.clone(), config.inference_timeout)?;
            Ok(Arc::new(detector))
        }
        DetectorBackend::Torch => load_torch(config),
        DetectorBackend::Disabled => Ok(Arc::new(DisabledDetector::new(
            "detection disabled by configuration",
        ))),
    }
}

#[cfg(feature = "torch")]
fn load_torch(config: &AppConfig) -> Result<Arc<dyn Detector>, InferenceError> {
    let detector = torch::TorchDetector::load(&config.model_path, &config.detector)?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "torch"))]
fn load_torch(_config: &AppConfig) -> Result<Arc<dyn Detector>, InferenceError> {
    Err(InferenceError::ModelUnavailable(
        "built without the `torch` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn disabled_backend_reports_not_loaded() {
        let detector = build_detector(&config(&[
            ("REPORT_STORE", "memory"),
            ("DETECTOR_BACKEND", "disabled"),
        ]));
        assert!(!detector.describe().loaded);
    }

    #[test]
    fn http_backend_points_at_configured_url() {
        let detector = build_detector(&config(&[
            ("REPORT_STORE", "memory"),
            ("DETECTOR_URL", "http://detector.internal:9000/detect"),
        ]));
        let description = detector.describe();
        assert_eq!(description.backend, "http");
        assert_eq!(description.source.as_deref(), Some("http://detector.internal:9000/detect"));
    }

    #[cfg(not(feature = "torch"))]
    #[test]
    fn torch_backend_without_feature_falls_back_to_disabled() {
        let detector = build_detector(&config(&[
            ("REPORT_STORE", "memory"),
            ("DETECTOR_BACKEND", "torch"),
        ]));
        assert_eq!(detector.describe().backend, "disabled");
    }
}
