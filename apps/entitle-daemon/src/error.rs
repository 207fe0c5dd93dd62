//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use entitle_sync::{StoreError, SyncError};

/// Error body returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No entitlement for the unit and application.
    #[error("No entitlement for unit {unit_id} and application {app_code}")]
    NotFound { unit_id: String, app_code: String },

    /// A resync failed or was rejected.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The resync task panicked.
    #[error("resync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Sync(SyncError::AlreadyRunning) => StatusCode::CONFLICT,
            ApiError::Sync(SyncError::StageTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Sync(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Sync(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Sync(e) => e.error_code(),
            ApiError::Store(_) => "STORE_UNAVAILABLE",
            ApiError::Task(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let body = ErrorBody {
            status: status.as_u16(),
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitle_sync::RunPhase;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Sync(SyncError::AlreadyRunning).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Sync(SyncError::StageTimeout {
                phase: RunPhase::Linking,
                timeout_secs: 5,
            })
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::Sync(SyncError::EmptyListing).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Store(StoreError::Poisoned).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_codes() {
        let err = ApiError::NotFound {
            unit_id: "u1".into(),
            app_code: "AGENDA".into(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(ApiError::Sync(SyncError::EmptyListing).code(), "EMPTY_LISTING");
    }

    #[tokio::test]
    async fn test_panicked_task_is_internal_error() {
        let join_error = tokio::spawn(async { panic!("resync panicked") })
            .await
            .unwrap_err();
        let err = ApiError::from(join_error);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
