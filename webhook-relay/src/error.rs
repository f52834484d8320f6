use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no webhook is registered under {0:?}")]
    UnknownSubscription(String),
    #[error("the webhook registry has shut down")]
    RegistryClosed,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::UnknownSubscription(_) => StatusCode::NOT_FOUND,
            RelayError::RegistryClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}
