pub mod handlers;
pub mod server;
pub mod state;
pub mod websocket;

pub use server::ApiServer;
pub use state::AppState;

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use monitor_core::MonitorError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AlertQuery {
    /// Newest `limit` alerts; all held alerts when absent.
    pub limit: Option<usize>,
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ApiResponse::<()>::error(self.message));
        (self.status, body).into_response()
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let status = match err {
            MonitorError::DetectorUninitialized => StatusCode::SERVICE_UNAVAILABLE,
            MonitorError::InvalidSnapshot(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let err = ApiError::from(MonitorError::DetectorUninitialized);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.message, "Detector not initialized");

        let err = ApiError::from(MonitorError::InvalidSnapshot("bad".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(MonitorError::Other("boom".to_string()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
