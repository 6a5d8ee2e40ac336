//! Error-to-status mapping for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sibyl_error::{
    GatewayErrorKind, ProviderErrorKind, SibylError, SibylErrorKind, StoreErrorKind,
};

/// A pipeline failure rendered as an HTTP response.
///
/// Validator and execution failures never reach this type; the pipeline
/// folds them into the response body's `error` field instead.
#[derive(Debug)]
pub struct ApiError(pub SibylError);

impl From<SibylError> for ApiError {
    fn from(err: SibylError) -> Self {
        Self(err)
    }
}

fn status_for(err: &SibylError) -> StatusCode {
    match err.kind() {
        SibylErrorKind::Gateway(gateway) => match &gateway.kind {
            GatewayErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            GatewayErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayErrorKind::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        SibylErrorKind::Provider(provider) => match &provider.kind {
            ProviderErrorKind::UnknownProvider(_) => StatusCode::NOT_FOUND,
            ProviderErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        },
        SibylErrorKind::Store(store) => match &store.kind {
            StoreErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        SibylErrorKind::Adapter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SibylErrorKind::Guard(_) => StatusCode::BAD_REQUEST,
        SibylErrorKind::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The message shown to callers, stripped of source locations.
fn public_message(err: &SibylError) -> String {
    match err.kind() {
        SibylErrorKind::Gateway(gateway) => gateway.kind.to_string(),
        SibylErrorKind::Provider(provider) => provider.kind.to_string(),
        SibylErrorKind::Store(store) => store.kind.to_string(),
        SibylErrorKind::Adapter(adapter) => adapter.kind.to_string(),
        SibylErrorKind::Guard(guard) => guard.kind.to_string(),
        SibylErrorKind::Config(config) => config.message.clone(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request refused");
        }
        (status, Json(json!({ "error": public_message(&self.0) }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_error::{AdapterError, AdapterErrorKind, GatewayError, ProviderError, StoreError};

    #[test]
    fn statuses_follow_error_kinds() {
        let cases: Vec<(SibylError, StatusCode)> = vec![
            (
                GatewayError::new(GatewayErrorKind::AccessDenied).into(),
                StatusCode::FORBIDDEN,
            ),
            (GatewayError::not_found("connection").into(), StatusCode::NOT_FOUND),
            (GatewayError::invalid("bad").into(), StatusCode::BAD_REQUEST),
            (
                ProviderError::new(ProviderErrorKind::NotConfigured("openai".into())).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProviderError::new(ProviderErrorKind::Timeout).into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ProviderError::new(ProviderErrorKind::UnknownProvider("x".into())).into(),
                StatusCode::NOT_FOUND,
            ),
            (StoreError::not_found("session").into(), StatusCode::NOT_FOUND),
            (
                AdapterError::new(AdapterErrorKind::Connect("refused".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err}");
        }
    }

    #[test]
    fn public_message_hides_locations() {
        let err: SibylError = GatewayError::not_found("connection").into();
        let message = public_message(&err);
        assert_eq!(message, "connection not found");
        assert!(!message.contains(".rs"));
    }
}
