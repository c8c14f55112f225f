/// Mapping of crate errors onto HTTP responses.
///
/// Every failure renders as `{ "success": false, "error": KIND, "message": ... }`.
/// Ledger failures keep distinct statuses so a client can tell "the ledger
/// said no" from "the ledger could not be asked".
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::MediError;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
    /// Transaction to check on later, for unconfirmed registrations.
    #[serde(rename = "txRef", skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
}

impl MediError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MediError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            MediError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MediError::NotFound(_) => StatusCode::NOT_FOUND,
            MediError::Rejected(_) | MediError::InconsistentState(_) => StatusCode::CONFLICT,
            MediError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            MediError::Connectivity(_) | MediError::Ocr(_) => StatusCode::BAD_GATEWAY,
            MediError::Unconfirmed { .. } => StatusCode::GATEWAY_TIMEOUT,
            MediError::Database(_) | MediError::Io(_) | MediError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for MediError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "Request refused");
        }

        let tx_ref = match &self {
            MediError::Unconfirmed { tx_ref } => Some(tx_ref.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: self.kind(),
            message: self.to_string(),
            tx_ref,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_failures_have_distinct_statuses() {
        assert_eq!(
            MediError::Rejected("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            MediError::Connectivity("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            MediError::NotConfigured("endpoint".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            MediError::Unconfirmed { tx_ref: "0x1".into() }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            MediError::NotFound("Document".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
