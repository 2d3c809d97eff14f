use axum::http::StatusCode;
use folio_core::CoreError;

/// Maps a store error onto the status code the API reports for it.
pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::InvalidResource(_) => StatusCode::BAD_REQUEST,
        CoreError::VersionConflict { .. } => StatusCode::CONFLICT,
        CoreError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Converts a store error into the handlers' error response.
pub fn api_error(err: CoreError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&CoreError::not_found("resource", "corpus/en")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&CoreError::invalid_resource("bad key")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoreError::VersionConflict {
                key: "corpus/en".to_string(),
                attempts: 5,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&CoreError::Timeout {
                operation: "save",
                elapsed: Duration::from_secs(1),
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&CoreError::corrupted("corpus/en/1.0.0", "checksum mismatch")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
