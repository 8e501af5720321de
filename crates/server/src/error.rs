//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sites::SiteError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller did not identify itself.
    Unauthorized(String),
    /// Site command error.
    Site(SiteError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Site(err) => site_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn site_error_to_response(err: SiteError) -> (StatusCode, String) {
    let status = match &err {
        SiteError::NotFound(_) | SiteError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
        SiteError::Forbidden { .. } => StatusCode::FORBIDDEN,
        SiteError::DuplicateSite { .. } => StatusCode::TOO_MANY_REQUESTS,
        SiteError::InvalidTransition { .. } => StatusCode::CONFLICT,
        SiteError::MissingField(_)
        | SiteError::UnsupportedDomainType(_)
        | SiteError::InvalidDomain(_)
        | SiteError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
        SiteError::Store(_) | SiteError::Workflow(_) => {
            tracing::error!(error = %err, "site command failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<SiteError> for ApiError {
    fn from(err: SiteError) -> Self {
        ApiError::Site(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SiteId, SiteStatus, UserId};

    fn status_of(err: SiteError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn site_errors_map_to_statuses() {
        assert_eq!(status_of(SiteError::NotFound(SiteId::new(1))), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(SiteError::Forbidden {
                site_id: SiteId::new(1),
                user_id: UserId::new(2)
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(SiteError::DuplicateSite { window_seconds: 300 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(SiteError::InvalidTransition {
                from: SiteStatus::Created,
                to: SiteStatus::InCreation
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SiteError::InvalidDomain("a..b".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
