pub mod types;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upstream::UpstreamError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn test_error_display_messages() {
        let err = AppError::Config("ttl out of range".to_string());
        assert_eq!(err.to_string(), "Configuration error: ttl out of range");

        let err = AppError::InvalidInput("Missing access information".to_string());
        assert_eq!(err.to_string(), "Invalid input: Missing access information");

        let err = CacheError::InvalidFilter;
        assert!(err.to_string().contains("role_id or user_id"));
    }

    #[test]
    fn test_error_to_response_conversion() {
        let err = AppError::InvalidInput("test".to_string());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = AppError::ServiceUnavailable("provider down".to_string());
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = AppError::Config("test".to_string());
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_filter_maps_to_bad_request() {
        let err: AppError = CacheError::InvalidFilter.into();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upstream_errors_map_by_kind() {
        let err: AppError = UpstreamError::Timeout.into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));

        let err: AppError = UpstreamError::Rejected {
            code: "DATA.INVALID".to_string(),
            message: "Missing role".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_internal_error_hides_details() {
        let internal = anyhow::anyhow!("Connection to 10.0.0.7:6379 refused");
        let response = AppError::Internal(internal).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
