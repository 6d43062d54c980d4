use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use tch::{CModule, Device, Kind, Tensor};

use super::config::DetectorSettings;
use super::model::{Detector, InferenceError, ModelDescription, RawDetection};
use super::{postprocess, preprocess};

/// YOLOv8 TorchScript export, loaded once and shared between requests.
#[derive(Clone)]
pub struct TorchDetector {
    model: Arc<Mutex<CModule>>,
    device: Device,
    model_path: PathBuf,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TorchDetector {
    pub fn load(model_path: &Path, settings: &DetectorSettings) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::ModelUnavailable(format!(
                "model file not found at {}",
                model_path.display()
            )));
        }
        let device = Device::cuda_if_available();
        let model = CModule::load_on_device(model_path, device)
            .map_err(|e| InferenceError::ModelUnavailable(e.to_string()))?;
        log::info!("Loaded TorchScript model {} on {:?}", model_path.display(), device);

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            device,
            model_path: model_path.to_path_buf(),
            input_size: settings.input_size,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
        })
    }

    fn run(&self, image_bytes: &[u8]) -> Result<Vec<RawDetection>, InferenceError> {
        let prepared = preprocess::prepare(image_bytes, self.input_size)?;
        let size = self.input_size as i64;
        let input = Tensor::from_slice(&prepared.data)
            .view([1, 3, size, size])
            .to_device(self.device);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| InferenceError::Backend("model lock poisoned".to_string()))?;
            model
                .forward_ts(&[input])
                .map_err(|e| InferenceError::Backend(e.to_string()))?
        };

        let output = output.to_kind(Kind::Float).to_device(Device::Cpu);
        let shape: Vec<usize> = output.size().iter().map(|&d| d as usize).collect();
        let numel = output.numel();
        let mut flat = vec![0f32; numel];
        output.view([-1]).copy_data(&mut flat, numel);
        let array = ArrayD::from_shape_vec(IxDyn(&shape), flat)
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        postprocess::decode_yolo_output(
            array.view(),
            self.confidence_threshold,
            self.iou_threshold,
            prepared.scale(),
        )
    }
}

#[async_trait]
impl Detector for TorchDetector {
    async fn detect(&self, image: &Path) -> Result<Vec<RawDetection>, InferenceError> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| InferenceError::InvalidImage(format!("{}: {}", image.display(), e)))?;
        let detector = self.clone();
        tokio::task::spawn_blocking(move || detector.run(&bytes))
            .await
            .map_err(|e| InferenceError::Backend(e.to_string()))?
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            loaded: true,
            backend: "torch",
            source: Some(self.model_path.display().to_string()),
        }
    }
}
