use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use url::Url;

use super::model::{Detector, InferenceError, ModelDescription, RawDetection};

/// Sends images to an external detection service.
///
/// The service receives the raw image bytes as the request body and answers with
/// `{"detections": [{"class_id": 6, "confidence": 0.91, "bbox": [x1, y1, x2, y2]}]}`.
#[derive(Clone)]
pub struct RemoteDetector {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    #[serde(default)]
    detections: Vec<RemoteDetection>,
}

#[derive(Debug, Deserialize)]
struct RemoteDetection {
    class_id: u32,
    confidence: f32,
    bbox: [f32; 4],
}

impl RemoteDetector {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::ModelUnavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    async fn detect(&self, image: &Path) -> Result<Vec<RawDetection>, InferenceError> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| InferenceError::InvalidImage(format!("{}: {}", image.display(), e)))?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, mime_for(image))
            .body(bytes)
            .send()
            .await
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Backend(format!(
                "detector service returned {}",
                status
            )));
        }

        let body: RemoteResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Backend(format!("malformed detector response: {}", e)))?;

        Ok(body
            .detections
            .into_iter()
            .map(|d| RawDetection {
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: d.bbox,
            })
            .collect())
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            loaded: true,
            backend: "http",
            source: Some(self.endpoint.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, HttpServer, web};

    async fn serve(handler: fn() -> HttpResponse) -> Url {
        let server = HttpServer::new(move || {
            App::new().route("/detect", web::post().to(move || async move { handler() }))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        Url::parse(&format!("http://{}/detect", addr)).unwrap()
    }

    fn write_image(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("upload.png");
        std::fs::write(&path, b"\x89PNG fake body").unwrap();
        path
    }

    #[actix_web::test]
    async fn parses_detections_from_the_service() {
        let endpoint = serve(|| {
            HttpResponse::Ok().json(serde_json::json!({
                "detections": [
                    {"class_id": 6, "confidence": 0.91, "bbox": [1.0, 2.0, 3.0, 4.0]},
                    {"class_id": 1, "confidence": 0.3, "bbox": [5.0, 6.0, 7.0, 8.0]}
                ]
            }))
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let detector = RemoteDetector::new(endpoint, Duration::from_secs(5)).unwrap();

        let detections = detector.detect(&write_image(&dir)).await.unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 6);
        assert_eq!(detections[1].bbox, [5.0, 6.0, 7.0, 8.0]);
        assert_eq!(detector.describe().backend, "http");
    }

    #[actix_web::test]
    async fn non_success_status_is_a_backend_error() {
        let endpoint = serve(|| HttpResponse::ServiceUnavailable().finish()).await;
        let dir = tempfile::tempdir().unwrap();
        let detector = RemoteDetector::new(endpoint, Duration::from_secs(5)).unwrap();

        let err = detector.detect(&write_image(&dir)).await.unwrap_err();
        assert!(matches!(err, InferenceError::Backend(_)));
    }

    #[actix_web::test]
    async fn missing_file_is_an_invalid_image() {
        let detector = RemoteDetector::new(
            Url::parse("http://127.0.0.1:9/detect").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = detector.detect(Path::new("/nonexistent/x.jpg")).await.unwrap_err();
        assert!(matches!(err, InferenceError::InvalidImage(_)));
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("noext")), "image/jpeg");
    }
}
