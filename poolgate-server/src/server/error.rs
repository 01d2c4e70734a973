use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use poolgate_core::GateError;

#[derive(Debug, Clone)]
pub struct DavError {
    status: StatusCode,
    message: String,
    allow: Option<String>,
}

impl DavError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            allow: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn method_not_allowed(allow: impl Into<String>) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "method not allowed".to_string(),
            allow: Some(allow.into()),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<GateError> for DavError {
    fn from(error: GateError) -> Self {
        match &error {
            GateError::ObjectNotFound(_) | GateError::PoolNotFound(_) => {
                Self::not_found(error.to_string())
            }
            GateError::PoolExists(_) => Self::conflict(error.to_string()),
            GateError::InvalidRequest(_) | GateError::Body(_) => {
                Self::bad_request(error.to_string())
            }
            _ => Self::internal(error.to_string()),
        }
    }
}

impl IntoResponse for DavError {
    fn into_response(self) -> Response {
        let body = format!(
            "{} {}\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Error")
        );
        let mut response = Response::new(body.into());
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        if let Some(allow) = self.allow
            && let Ok(value) = HeaderValue::from_str(&allow)
        {
            response.headers_mut().insert(header::ALLOW, value);
        }

        response
    }
}

pub type DavResult<T> = std::result::Result<T, DavError>;
