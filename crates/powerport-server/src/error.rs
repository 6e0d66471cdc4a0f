//! Response envelope and API error mapping.
//!
//! Every `/api` response, success or failure, has the shape
//! `{success, statusCode, timestamp, data?, message?}`.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use powerport_core::Error;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    pub status_code: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    fn new(success: bool, status: StatusCode, data: Option<T>, message: Option<String>) -> Self {
        Self {
            success,
            status_code: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
            message,
        }
    }
}

/// Successful response
#[derive(Debug)]
pub struct Reply<T> {
    status: StatusCode,
    data: Option<T>,
    message: Option<String>,
}

impl<T: Serialize> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data: Some(data),
            message: None,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Reply<()> {
    /// Message-only response
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let body = Envelope::new(true, self.status, self.data, self.message);
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Reply<T>, ApiError>;

/// Error response carrying a core error
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    message: Option<String>,
}

impl ApiError {
    /// Replace the default message (the error's display text)
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            message: None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Error::validation(rejection.body_text()).into()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Error::validation(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let (data, default_message) = match &self.error {
            // Daemon status and body are passed through untouched
            Error::RemoteRejected { body, .. } => (Some(body.clone()), self.error.to_string()),
            Error::Validation(_)
            | Error::NotFound(_)
            | Error::Conflict(_)
            | Error::Unauthorized(_)
            | Error::RemoteUnavailable(_) => (None, self.error.to_string()),
            internal => {
                error!(error = %internal, "Request failed");
                (None, "Internal server error".to_string())
            }
        };

        let message = self.message.unwrap_or(default_message);
        let body: Envelope<Value> = Envelope::new(false, status, data, Some(message));
        (status, Json(body)).into_response()
    }
}
