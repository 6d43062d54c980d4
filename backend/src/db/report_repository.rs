use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{DetectionsPayload, ReportStats, ReportStatus};
use sqlx::migrate::MigrateError;

/// WGS84 longitude/latitude in degrees.
pub const SRID_WGS84: i32 = 4326;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),
    #[error("Invalid status. Must be one of: {}", ReportStatus::allowed_values())]
    InvalidStatus(String),
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("Report not found")]
    NotFound(i64),
    #[error("stored report {id} is corrupt: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// Normalises and validates a user supplied status.
pub fn parse_status(raw: &str) -> Result<ReportStatus, RepositoryError> {
    ReportStatus::parse_normalized(raw).ok_or_else(|| RepositoryError::InvalidStatus(raw.to_string()))
}

/// A geographic position. Fields are named so latitude and longitude cannot be swapped
/// by argument order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, RepositoryError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(RepositoryError::InvalidCoordinates(format!(
                "latitude must be between -90 and 90, got {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(RepositoryError::InvalidCoordinates(format!(
                "longitude must be between -180 and 180, got {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Axis-aligned lon/lat rectangle; both edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingArea {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingArea {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, RepositoryError> {
        let corner_a = GeoPoint::new(min_lat, min_lon)?;
        let corner_b = GeoPoint::new(max_lat, max_lon)?;
        if corner_a.longitude > corner_b.longitude || corner_a.latitude > corner_b.latitude {
            return Err(RepositoryError::InvalidCoordinates(
                "bounding box minimum must not exceed its maximum".to_string(),
            ));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lon..=self.max_lon).contains(&point.longitude)
            && (self.min_lat..=self.max_lat).contains(&point.latitude)
    }
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub image_path: String,
    pub boxed_image_path: Option<String>,
    pub prediction: String,
    pub confidence: Option<f64>,
    pub detections: Option<DetectionsPayload>,
    pub location: GeoPoint,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub image_path: String,
    pub boxed_image_path: Option<String>,
    pub prediction: Option<String>,
    pub confidence: Option<f64>,
    pub detections: Option<DetectionsPayload>,
    pub status: ReportStatus,
    pub location: GeoPoint,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Inserts a pending report and returns it with its assigned id.
    async fn create(&self, report: NewReport) -> Result<Report, RepositoryError>;

    async fn get(&self, id: i64) -> Result<Option<Report>, RepositoryError>;

    /// Reports in id order.
    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Report>, RepositoryError>;

    async fn list_in_area(&self, area: BoundingArea) -> Result<Vec<Report>, RepositoryError>;

    async fn list_by_status(
        &self,
        status: ReportStatus,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Report>, RepositoryError>;

    /// `None` when no report has that id.
    async fn update_status(
        &self,
        id: i64,
        status: ReportStatus,
    ) -> Result<Option<Report>, RepositoryError>;

    async fn count_by_status(&self) -> Result<ReportStats, RepositoryError>;
}
