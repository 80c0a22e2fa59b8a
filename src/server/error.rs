//! Error responses for the relay endpoint.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::ErrorBody;
use crate::core::gateway::GatewayError;

#[derive(Debug)]
pub enum ServerError {
    /// The request body could not be read as a chat request.
    BadRequest(String),
    /// The model gateway failed before streaming began.
    Gateway(GatewayError),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Gateway(GatewayError::EmptyConversation) => StatusCode::BAD_REQUEST,
            ServerError::Gateway(err) if err.is_configuration() => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::BadRequest(detail) => write!(f, "Invalid chat request: {detail}"),
            ServerError::Gateway(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::BadRequest(_) => None,
            ServerError::Gateway(err) => Some(err),
        }
    }
}

impl From<GatewayError> for ServerError {
    fn from(value: GatewayError) -> Self {
        ServerError::Gateway(value)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
