use actix_multipart::MultipartError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::db::report_repository::RepositoryError;
use crate::storage::image_storage::StorageError;

/// Errors as seen by HTTP clients. Internal details are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            ApiError::Internal(detail) => {
                log::error!("Request failed: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse { error })
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidFormat | StorageError::Empty => ApiError::BadRequest(err.to_string()),
            StorageError::FileTooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            StorageError::Io(e) => ApiError::Internal(format!("storage: {}", e)),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InvalidStatus(_) | RepositoryError::InvalidCoordinates(_) => {
                ApiError::BadRequest(err.to_string())
            }
            RepositoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid multipart payload: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn internal_errors_are_opaque() {
        let err = ApiError::from(RepositoryError::Corrupt {
            id: 3,
            reason: "password=hunter2".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"Internal server error"}"#);
    }

    #[actix_web::test]
    async fn client_errors_name_the_constraint() {
        let err = ApiError::from(RepositoryError::InvalidStatus("archived".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        assert_eq!(
            &body[..],
            br#"{"error":"Invalid status. Must be one of: pending, cleaned"}"#
        );

        let err = ApiError::from(StorageError::FileTooLarge { limit_mb: 10 });
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::from(RepositoryError::NotFound(9)).status_code(), StatusCode::NOT_FOUND);
    }
}
