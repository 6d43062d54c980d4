use std::path::PathBuf;

use actix_files::Files;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use serde::Deserialize;
use shared::HealthResponse;

use crate::db::report_repository::{BoundingArea, GeoPoint};
use crate::error::ApiError;
use crate::reports::report_service::{
    ReportService, UploadMetadata, UploadRequest, UploadedImage,
};
use crate::storage::image_storage::{ANNOTATED_URL_PREFIX, UPLOADS_URL_PREFIX};

pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 1000;
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

pub fn configure_routes(cfg: &mut web::ServiceConfig, upload_dir: PathBuf, annotated_dir: PathBuf) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .service(web::resource("/health").route(web::get().to(health)))
    .service(web::resource("/predict").route(web::post().to(upload_report)))
    .service(web::resource("/upload-report").route(web::post().to(upload_report)))
    .service(web::resource("/reports").route(web::get().to(list_reports)))
    .service(web::resource("/reports/stats").route(web::get().to(report_stats)))
    .service(web::resource("/reports/by-status/{status}").route(web::get().to(reports_by_status)))
    .service(web::resource("/reports/{report_id}").route(web::get().to(get_report)))
    .service(web::resource("/reports/{report_id}/status").route(web::patch().to(update_status)))
    .service(web::resource("/reports-in-area").route(web::get().to(reports_in_area)))
    .service(web::resource("/model/info").route(web::get().to(model_info)))
    .service(Files::new(ANNOTATED_URL_PREFIX, annotated_dir))
    .service(Files::new(UPLOADS_URL_PREFIX, upload_dir));
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Pagination {
    fn bounds(&self) -> (i64, i64) {
        (self.skip as i64, self.limit.min(MAX_PAGE_LIMIT) as i64)
    }
}

#[derive(Debug, Deserialize)]
pub struct AreaQuery {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    status: String,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn upload_report(
    service: web::Data<ReportService>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request = read_upload_form(payload, &service).await?;
    let response = service.handle_upload(request).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn list_reports(
    service: web::Data<ReportService>,
    query: web::Query<Pagination>,
) -> Result<HttpResponse, ApiError> {
    let (skip, limit) = query.bounds();
    Ok(HttpResponse::Ok().json(service.list_reports(skip, limit).await?))
}

async fn report_stats(service: web::Data<ReportService>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(service.stats().await?))
}

async fn get_report(
    service: web::Data<ReportService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(service.get_report(path.into_inner()).await?))
}

async fn reports_in_area(
    service: web::Data<ReportService>,
    query: web::Query<AreaQuery>,
) -> Result<HttpResponse, ApiError> {
    let area = BoundingArea::new(query.min_lon, query.min_lat, query.max_lon, query.max_lat)?;
    Ok(HttpResponse::Ok().json(service.reports_in_area(area).await?))
}

async fn reports_by_status(
    service: web::Data<ReportService>,
    path: web::Path<String>,
    query: web::Query<Pagination>,
) -> Result<HttpResponse, ApiError> {
    let (skip, limit) = query.bounds();
    let response = service.reports_by_status(&path.into_inner(), skip, limit).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn update_status(
    service: web::Data<ReportService>,
    path: web::Path<i64>,
    query: web::Query<StatusQuery>,
) -> Result<HttpResponse, ApiError> {
    let response = service.update_status(path.into_inner(), &query.status).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn model_info(service: web::Data<ReportService>) -> HttpResponse {
    HttpResponse::Ok().json(service.model_info())
}

/// Buffers a field, failing as soon as it grows past `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> Result<Option<Vec<u8>>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if data.len() + chunk.len() > limit {
            return Ok(None);
        }
        data.extend_from_slice(&chunk);
    }
    Ok(Some(data))
}

async fn read_text_field(field: &mut Field, name: &str) -> Result<String, ApiError> {
    let data = read_field(field, MAX_TEXT_FIELD_BYTES)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("{} is too long", name)))?;
    String::from_utf8(data).map_err(|_| ApiError::BadRequest(format!("{} must be UTF-8 text", name)))
}

fn parse_coordinate(name: &str, raw: Option<String>) -> Result<f64, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest(format!("{} is required", name)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ApiError::BadRequest(format!("{} must be a number", name)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

async fn read_upload_form(
    mut payload: Multipart,
    service: &ReportService,
) -> Result<UploadRequest, ApiError> {
    let mut image: Option<UploadedImage> = None;
    let mut latitude: Option<String> = None;
    let mut longitude: Option<String> = None;
    let mut metadata = UploadMetadata::default();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(|f| f.to_string());
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = read_field(&mut field, service.max_upload_bytes())
                    .await?
                    .ok_or_else(|| ApiError::from(service.upload_too_large()))?;
                image = Some(UploadedImage {
                    filename,
                    content_type,
                    bytes,
                });
            }
            "latitude" => latitude = Some(read_text_field(&mut field, "latitude").await?),
            "longitude" => longitude = Some(read_text_field(&mut field, "longitude").await?),
            "category" => metadata.category = non_empty(read_text_field(&mut field, "category").await?),
            "title" => metadata.title = non_empty(read_text_field(&mut field, "title").await?),
            "description" => {
                metadata.description = non_empty(read_text_field(&mut field, "description").await?)
            }
            "severity" => {
                metadata.severity = match non_empty(read_text_field(&mut field, "severity").await?) {
                    Some(raw) => Some(raw.parse::<i32>().map_err(|_| {
                        ApiError::BadRequest("severity must be an integer".to_string())
                    })?),
                    None => None,
                }
            }
            other => {
                log::debug!("Ignoring unexpected form field '{}'", other);
                while field.try_next().await?.is_some() {}
            }
        }
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("file is required".to_string()))?;
    let location = GeoPoint::new(
        parse_coordinate("latitude", latitude)?,
        parse_coordinate("longitude", longitude)?,
    )?;

    Ok(UploadRequest {
        image,
        location,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_limit_is_clamped() {
        let page = Pagination {
            skip: 3,
            limit: 50_000,
        };
        assert_eq!(page.bounds(), (3, MAX_PAGE_LIMIT as i64));
    }

    #[test]
    fn coordinates_must_be_present_and_numeric() {
        assert_eq!(parse_coordinate("latitude", Some(" 12.9 ".to_string())).unwrap(), 12.9);
        assert!(matches!(
            parse_coordinate("latitude", None),
            Err(ApiError::BadRequest(msg)) if msg == "latitude is required"
        ));
        assert!(parse_coordinate("longitude", Some("east".to_string())).is_err());
    }

    #[test]
    fn blank_metadata_is_dropped() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty(" Bins ".to_string()), Some("Bins".to_string()));
    }
}
