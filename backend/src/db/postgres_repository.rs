//! PostGIS-backed report store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{DetectionsPayload, ReportStats, ReportStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::report_repository::{
    BoundingArea, GeoPoint, NewReport, Report, ReportRepository, RepositoryError, SRID_WGS84,
};

const REPORT_COLUMNS: &str = "id, image_path, boxed_image_path, prediction, confidence, \
     detections, status, created_at, ST_Y(geom) AS latitude, ST_X(geom) AS longitude";

#[derive(Clone)]
pub struct PostgresReportRepository {
    pool: PgPool,
}

impl PostgresReportRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn report_from_row(row: &PgRow) -> Result<Report, RepositoryError> {
    let id: i64 = row.try_get("id")?;

    let status_str: String = row.try_get("status")?;
    let status = ReportStatus::parse_normalized(&status_str).ok_or_else(|| RepositoryError::Corrupt {
        id,
        reason: format!("unknown status '{}'", status_str),
    })?;

    let detections = match row.try_get::<Option<Value>, _>("detections")? {
        Some(value) => match serde_json::from_value::<DetectionsPayload>(value) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::warn!("Ignoring unreadable detections on report {}: {}", id, e);
                None
            }
        },
        None => None,
    };

    let latitude: f64 = row.try_get("latitude")?;
    let longitude: f64 = row.try_get("longitude")?;

    Ok(Report {
        id,
        image_path: row.try_get("image_path")?,
        boxed_image_path: row.try_get("boxed_image_path")?,
        prediction: row.try_get("prediction")?,
        confidence: row.try_get("confidence")?,
        detections,
        status,
        location: GeoPoint {
            latitude,
            longitude,
        },
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn reports_from_rows(rows: &[PgRow]) -> Result<Vec<Report>, RepositoryError> {
    rows.iter().map(report_from_row).collect()
}

#[async_trait]
impl ReportRepository for PostgresReportRepository {
    async fn create(&self, report: NewReport) -> Result<Report, RepositoryError> {
        let sql = format!(
            r#"
            INSERT INTO garbage_reports (
                image_path,
                boxed_image_path,
                prediction,
                confidence,
                detections,
                status,
                geom
            ) VALUES ($1, $2, $3, $4, $5, $6, ST_SetSRID(ST_MakePoint($7, $8), $9))
            RETURNING {REPORT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&report.image_path)
            .bind(&report.boxed_image_path)
            .bind(&report.prediction)
            .bind(report.confidence)
            .bind(report.detections.as_ref().map(Json))
            .bind(ReportStatus::Pending.as_str())
            // ST_MakePoint takes x (longitude) before y (latitude)
            .bind(report.location.longitude)
            .bind(report.location.latitude)
            .bind(SRID_WGS84)
            .fetch_one(&self.pool)
            .await?;
        report_from_row(&row)
    }

    async fn get(&self, id: i64) -> Result<Option<Report>, RepositoryError> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM garbage_reports WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Report>, RepositoryError> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM garbage_reports ORDER BY id OFFSET $1 LIMIT $2");
        let rows = sqlx::query(&sql)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        reports_from_rows(&rows)
    }

    async fn list_in_area(&self, area: BoundingArea) -> Result<Vec<Report>, RepositoryError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM garbage_reports \
             WHERE ST_Intersects(geom, ST_MakeEnvelope($1, $2, $3, $4, $5)) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(area.min_lon)
            .bind(area.min_lat)
            .bind(area.max_lon)
            .bind(area.max_lat)
            .bind(SRID_WGS84)
            .fetch_all(&self.pool)
            .await?;
        reports_from_rows(&rows)
    }

    async fn list_by_status(
        &self,
        status: ReportStatus,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Report>, RepositoryError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM garbage_reports WHERE status = $1 ORDER BY id OFFSET $2 LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        reports_from_rows(&rows)
    }

    async fn update_status(
        &self,
        id: i64,
        status: ReportStatus,
    ) -> Result<Option<Report>, RepositoryError> {
        let sql = format!("UPDATE garbage_reports SET status = $1 WHERE id = $2 RETURNING {REPORT_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn count_by_status(&self) -> Result<ReportStats, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'cleaned') AS cleaned
            FROM garbage_reports
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ReportStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            cleaned: row.try_get("cleaned")?,
        })
    }
}
