use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use compilify_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and implements [`IntoResponse`]
/// to produce consistent `{ "error", "code" }` JSON responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `compilify_core`.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => {
                let status = match core {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::UnknownConnection(_) => StatusCode::NOT_FOUND,
                    CoreError::DuplicateConnection(_) | CoreError::DuplicateJob(_) => {
                        StatusCode::CONFLICT
                    }
                    CoreError::PublishFailed { .. } => StatusCode::BAD_GATEWAY,
                    CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %core, "Internal core error");
                    "An internal error occurred".to_string()
                } else {
                    core.to_string()
                };
                (status, core.code(), message)
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
