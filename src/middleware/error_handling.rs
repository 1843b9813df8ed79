use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Maps an error kind to its HTTP status and response body. Internal failure
/// details are logged, never returned.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::VALIDATION_ERROR),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::PermissionDenied(_) => {
            (kinds::AUTHORIZATION_ERROR, error_codes::PERMISSION_DENIED)
        }
        AppError::NotFound => (kinds::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND),
        AppError::Conflict(_) => (kinds::CONFLICT_ERROR, error_codes::CONFLICT),
        AppError::InvariantViolation(_) => {
            (kinds::CONFLICT_ERROR, error_codes::ADMIN_INVARIANT_VIOLATION)
        }
        AppError::Timeout(_) => (kinds::SERVICE_UNAVAILABLE_ERROR, error_codes::STORAGE_TIMEOUT),
        AppError::StorageUnavailable(_) => (
            kinds::SERVICE_UNAVAILABLE_ERROR,
            error_codes::SERVICE_UNAVAILABLE,
        ),
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    let message = match err {
        AppError::Database(_)
        | AppError::Internal(_)
        | AppError::Config(_)
        | AppError::StartServer(_)
        | AppError::StorageUnavailable(_) => {
            tracing::error!(error = %err, "request failed");
            "internal error".to_string()
        }
        AppError::Timeout(op) => {
            tracing::warn!(operation = op, "storage deadline exceeded");
            "storage deadline exceeded, retry the request".to_string()
        }
        _ => err.to_string(),
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}
