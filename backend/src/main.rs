use std::env;
use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use wastewatch_backend::config::{AppConfig, ConfigError, StoreBackend};
use wastewatch_backend::db::memory_repository::InMemoryReportRepository;
use wastewatch_backend::db::postgres_repository::PostgresReportRepository;
use wastewatch_backend::db::report_repository::ReportRepository;
use wastewatch_backend::detector::build_detector;
use wastewatch_backend::detector::model::DetectionAdapter;
use wastewatch_backend::reports::report_service::ReportService;
use wastewatch_backend::routes::configure_routes;
use wastewatch_backend::storage::image_storage::ImageStorage;

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    log::error!("{}: {}", context, err);
    io::Error::other(format!("{}: {}", context, err))
}

async fn open_repository(config: &AppConfig) -> io::Result<Arc<dyn ReportRepository>> {
    match config.store {
        StoreBackend::Memory => {
            log::warn!("Using in-memory report store; reports are lost on restart");
            Ok(Arc::new(InMemoryReportRepository::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| startup_error("Invalid configuration", ConfigError::Missing("DATABASE_URL")))?;
            let repo = PostgresReportRepository::connect(url, config.db_max_connections)
                .await
                .map_err(|e| startup_error("Failed to connect to database", e))?;
            repo.run_migrations()
                .await
                .map_err(|e| startup_error("Failed to run migrations", e))?;
            log::info!("Connected to report database");
            Ok(Arc::new(repo))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let storage = ImageStorage::new(
        config.upload_dir.clone(),
        config.annotated_dir.clone(),
        config.max_upload_bytes,
    );
    storage
        .ensure_dirs()
        .map_err(|e| startup_error("Failed to create upload directories", e))?;

    let repository = open_repository(&config).await?;

    let detector = DetectionAdapter::new(
        build_detector(&config),
        config.detector.clone(),
        config.annotated_dir.clone(),
        config.inference_timeout,
    );
    let model = detector.model_info();
    log::info!(
        "Detector backend '{}' ({}), {} classes",
        model.backend,
        model.status,
        model.num_classes
    );

    let service = web::Data::new(ReportService::new(repository, storage, detector));
    let upload_dir = config.upload_dir.clone();
    let annotated_dir = config.annotated_dir.clone();
    let bind_address = (config.host.clone(), config.port);

    log::info!("Starting server on {}:{}", bind_address.0, bind_address.1);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "PATCH", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(service.clone())
            .configure(|cfg| configure_routes(cfg, upload_dir.clone(), annotated_dir.clone()))
    })
    .bind(bind_address)?
    .run()
    .await
}
