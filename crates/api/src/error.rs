//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OperationError;
use orchestrator::ServiceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Operation service error.
    Service(ServiceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => service_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_error_to_response(err: ServiceError) -> (StatusCode, String) {
    let status = match &err {
        ServiceError::OperationNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Operation(op_err) => match op_err {
            OperationError::InvalidStateTransition { .. }
            | OperationError::RetryLimitExceeded { .. } => StatusCode::CONFLICT,
            OperationError::UnknownOperationType(_) => StatusCode::BAD_REQUEST,
        },
        ServiceError::AlreadyRunning(_) => StatusCode::CONFLICT,
        ServiceError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Repository { .. } if err.is_concurrent_modification() => {
            StatusCode::CONFLICT
        }
        ServiceError::Repository { .. } => {
            tracing::error!(error = %err, "repository failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{OperationId, Version};
    use domain::{OperationStatus, OperationType};
    use operation_store::RepositoryError;

    use super::*;

    fn status_of(err: ServiceError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn maps_service_errors_to_status_codes() {
        assert_eq!(
            status_of(ServiceError::OperationNotFound(OperationId::new(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ServiceError::Operation(OperationError::InvalidStateTransition {
                from: OperationStatus::Completed,
                action: "cancel",
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ServiceError::Operation(OperationError::RetryLimitExceeded {
                attempts: 3,
                limit: 3,
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ServiceError::Operation(OperationError::UnknownOperationType(
                OperationType::TenantResume
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ServiceError::Repository {
                operation_id: Some(OperationId::new(1)),
                action: "complete",
                source: RepositoryError::ConcurrentModification {
                    operation_id: OperationId::new(1),
                    expected: Version::new(2),
                    actual: Version::new(3),
                },
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ServiceError::Repository {
                operation_id: None,
                action: "create",
                source: RepositoryError::Duplicate(OperationId::new(1)),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ServiceError::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
