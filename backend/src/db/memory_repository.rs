use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use shared::{ReportStats, ReportStatus};
use tokio::sync::RwLock;

use super::report_repository::{BoundingArea, NewReport, Report, ReportRepository, RepositoryError};

/// Process-local store with the same semantics as the Postgres one. Ids start at 1.
#[derive(Clone, Default)]
pub struct InMemoryReportRepository {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    last_id: i64,
    reports: BTreeMap<i64, Report>,
}

impl InMemoryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page(reports: impl Iterator<Item = Report>, skip: i64, limit: i64) -> Vec<Report> {
    reports
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl ReportRepository for InMemoryReportRepository {
    async fn create(&self, report: NewReport) -> Result<Report, RepositoryError> {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let stored = Report {
            id: state.last_id,
            image_path: report.image_path,
            boxed_image_path: report.boxed_image_path,
            prediction: Some(report.prediction),
            confidence: report.confidence,
            detections: report.detections,
            status: ReportStatus::Pending,
            location: report.location,
            created_at: Utc::now(),
        };
        state.reports.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: i64) -> Result<Option<Report>, RepositoryError> {
        Ok(self.state.read().await.reports.get(&id).cloned())
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Report>, RepositoryError> {
        let state = self.state.read().await;
        Ok(page(state.reports.values().cloned(), skip, limit))
    }

    async fn list_in_area(&self, area: BoundingArea) -> Result<Vec<Report>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .reports
            .values()
            .filter(|r| area.contains(&r.location))
            .cloned()
            .collect())
    }

    async fn list_by_status(
        &self,
        status: ReportStatus,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Report>, RepositoryError> {
        let state = self.state.read().await;
        let matching = state.reports.values().filter(|r| r.status == status).cloned();
        Ok(page(matching, skip, limit))
    }

    async fn update_status(
        &self,
        id: i64,
        status: ReportStatus,
    ) -> Result<Option<Report>, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state.reports.get_mut(&id).map(|report| {
            report.status = status;
            report.clone()
        }))
    }

    async fn count_by_status(&self) -> Result<ReportStats, RepositoryError> {
        let state = self.state.read().await;
        let mut stats = ReportStats::default();
        for report in state.reports.values() {
            stats.total += 1;
            match report.status {
                ReportStatus::Pending => stats.pending += 1,
                ReportStatus::Cleaned => stats.cleaned += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::report_repository::GeoPoint;

    fn new_report(latitude: f64, longitude: f64) -> NewReport {
        NewReport {
            image_path: "20250101000000_x.jpg".to_string(),
            boxed_image_path: None,
            prediction: "pending".to_string(),
            confidence: None,
            detections: None,
            location: GeoPoint::new(latitude, longitude).unwrap(),
        }
    }

    #[tokio::test]
    async fn create_assigns_increasing_ids_and_pending_status() {
        let repo = InMemoryReportRepository::new();
        let first = repo.create(new_report(12.9, 77.6)).await.unwrap();
        let second = repo.create(new_report(13.0, 77.7)).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, ReportStatus::Pending);

        let fetched = repo.get(first.id).await.unwrap().unwrap();
        assert_eq!(fetched.location.latitude, 12.9);
        assert_eq!(fetched.location.longitude, 77.6);
        assert!(repo.get(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_pages_in_id_order() {
        let repo = InMemoryReportRepository::new();
        for i in 0..5 {
            repo.create(new_report(i as f64, 0.0)).await.unwrap();
        }
        let ids: Vec<i64> = repo.list(1, 2).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(repo.list(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn area_query_includes_boundary_points() {
        let repo = InMemoryReportRepository::new();
        let inside = repo.create(new_report(12.5, 77.5)).await.unwrap();
        let edge = repo.create(new_report(13.0, 78.0)).await.unwrap();
        repo.create(new_report(13.01, 77.5)).await.unwrap();

        let area = BoundingArea::new(77.0, 12.0, 78.0, 13.0).unwrap();
        let ids: Vec<i64> = repo.list_in_area(area).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![inside.id, edge.id]);
    }

    #[tokio::test]
    async fn status_updates_and_filters() {
        let repo = InMemoryReportRepository::new();
        let a = repo.create(new_report(1.0, 1.0)).await.unwrap();
        repo.create(new_report(2.0, 2.0)).await.unwrap();

        let updated = repo.update_status(a.id, ReportStatus::Cleaned).await.unwrap().unwrap();
        assert_eq!(updated.status, ReportStatus::Cleaned);
        assert!(repo.update_status(42, ReportStatus::Cleaned).await.unwrap().is_none());

        let cleaned = repo.list_by_status(ReportStatus::Cleaned, 0, 100).await.unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].id, a.id);

        let stats = repo.count_by_status().await.unwrap();
        assert_eq!(stats, ReportStats { total: 2, pending: 1, cleaned: 1 });

        // any state may move to any other
        let back = repo.update_status(a.id, ReportStatus::Pending).await.unwrap().unwrap();
        assert_eq!(back.status, ReportStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_ids() {
        let repo = InMemoryReportRepository::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.create(new_report(i as f64, 0.0)).await.unwrap().id })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
    }
}
