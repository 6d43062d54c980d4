use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::detector::config::DetectorSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("failed to read detector config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse detector config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackend {
    Http,
    Torch,
    Disabled,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for DetectorBackend {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "http" | "remote" => Ok(Self::Http),
            "torch" => Ok(Self::Torch),
            "disabled" | "none" => Ok(Self::Disabled),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub store: StoreBackend,
    pub upload_dir: PathBuf,
    pub annotated_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub detector_backend: DetectorBackend,
    pub detector_url: Url,
    pub model_path: PathBuf,
    pub inference_timeout: Duration,
    pub detector: DetectorSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so callers other than the
    /// process environment (tests, embedding) can supply values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or("PORT", get("PORT"), 8000u16)?;
        let database_url = get("DATABASE_URL");
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), 5u32)?;

        let store = match get("REPORT_STORE") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "REPORT_STORE",
                value: raw,
            })?,
            None => StoreBackend::Postgres,
        };
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let upload_dir = get("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./uploads"));
        let annotated_dir = get("ANNOTATED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| upload_dir.join("annotated"));

        let max_upload_mb = parse_or("MAX_UPLOAD_MB", get("MAX_UPLOAD_MB"), 10usize)?;
        if max_upload_mb == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_UPLOAD_MB",
                value: "0".to_string(),
            });
        }

        let detector_backend = match get("DETECTOR_BACKEND") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "DETECTOR_BACKEND",
                value: raw,
            })?,
            None => DetectorBackend::Http,
        };

        let raw_url = get("DETECTOR_URL").unwrap_or_else(|| "http://127.0.0.1:9000/detect".to_string());
        let detector_url = Url::parse(&raw_url).map_err(|_| ConfigError::Invalid {
            name: "DETECTOR_URL",
            value: raw_url.clone(),
        })?;

        let model_path = get("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./models/best.torchscript"));

        let timeout_secs = parse_or("INFERENCE_TIMEOUT_SECS", get("INFERENCE_TIMEOUT_SECS"), 30u64)?;

        let mut detector = match get("DETECTOR_CONFIG") {
            Some(path) => DetectorSettings::load(PathBuf::from(path))?,
            None => DetectorSettings::default(),
        };
        if let Some(raw) = get("CONFIDENCE_THRESHOLD") {
            let threshold: f32 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "CONFIDENCE_THRESHOLD",
                value: raw.clone(),
            })?;
            detector.confidence_threshold = threshold;
        }
        detector.validate()?;

        Ok(Self {
            host,
            port,
            database_url,
            db_max_connections,
            store,
            upload_dir,
            annotated_dir,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            detector_backend,
            detector_url,
            model_path,
            inference_timeout: Duration::from_secs(timeout_secs),
            detector,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn memory_store_needs_no_database_url() {
        let config = AppConfig::from_lookup(lookup(&[("REPORT_STORE", "memory")])).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.annotated_dir, PathBuf::from("./uploads").join("annotated"));
        assert_eq!(config.detector_backend, DetectorBackend::Http);
        assert_eq!(config.detector.confidence_threshold, 0.25);
    }

    #[test]
    fn postgres_store_requires_database_url() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("REPORT_STORE", "memory"), ("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("REPORT_STORE", "memory"),
            ("DETECTOR_BACKEND", "magic"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DETECTOR_BACKEND", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("REPORT_STORE", "memory"),
            ("CONFIDENCE_THRESHOLD", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "confidence_threshold", .. }));
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup(&[
            ("REPORT_STORE", "memory"),
            ("UPLOAD_DIR", "/srv/uploads"),
            ("MAX_UPLOAD_MB", "2"),
            ("CONFIDENCE_THRESHOLD", "0.1"),
            ("DETECTOR_BACKEND", "disabled"),
            ("INFERENCE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.annotated_dir, PathBuf::from("/srv/uploads/annotated"));
        assert_eq!(config.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.detector.confidence_threshold, 0.1);
        assert_eq!(config.detector_backend, DetectorBackend::Disabled);
        assert_eq!(config.inference_timeout, Duration::from_secs(5));
    }
}
