use std::any::Any;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::db::RepoError;
use crate::tx::TxError;
use crate::validation::ValidationErrors;

const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Domain-level outcomes produced by the services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("record not found")]
    RecordNotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Repository(RepoError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<RepoError> for ServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::RecordNotFound => ServiceError::RecordNotFound,
            RepoError::EditConflict => ServiceError::EditConflict,
            RepoError::DuplicateEmail => ServiceError::DuplicateEmail,
            other => ServiceError::Repository(other),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation(errors)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// HTTP-facing error; every variant renders as a JSON envelope.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("resource not found")]
    NotFound,

    #[error("method {method} not allowed")]
    MethodNotAllowed { method: Method, allow: &'static str },

    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("inactive account")]
    InactiveAccount,

    #[error("not permitted")]
    NotPermitted,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("invalid or expired activation token")]
    InvalidActivationToken,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Service(err) => service_error_response(err),
            AppError::Validation(errors) => failed_validation(errors),
            AppError::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
            AppError::NotFound => not_found(),
            AppError::MethodNotAllowed { method, allow } => {
                let mut res = error_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &format!("the {method} method is not supported for this resource"),
                );
                res.headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(allow));
                res
            }
            AppError::InvalidAuthenticationToken => {
                let mut res = error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid or missing authentication token",
                );
                res.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                res
            }
            AppError::AuthenticationRequired => error_response(
                StatusCode::UNAUTHORIZED,
                "you must be authenticated to access this resource",
            ),
            AppError::InactiveAccount => error_response(
                StatusCode::FORBIDDEN,
                "your user account must be activated to access this resource",
            ),
            AppError::NotPermitted => error_response(
                StatusCode::FORBIDDEN,
                "your user account does not have the necessary permissions to access this resource",
            ),
            AppError::RateLimitExceeded => {
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
            }
            AppError::InvalidActivationToken => failed_validation(ValidationErrors::single(
                "token",
                "invalid or expired activation token",
            )),
            AppError::Internal(msg) => server_error(&msg),
        }
    }
}

fn service_error_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Validation(errors) => failed_validation(errors),
        ServiceError::RecordNotFound => not_found(),
        ServiceError::EditConflict => error_response(
            StatusCode::CONFLICT,
            "unable to update the record due to an edit conflict, please try again",
        ),
        ServiceError::DuplicateEmail => error_response(
            StatusCode::CONFLICT,
            "a user with this email address already exists",
        ),
        ServiceError::InvalidCredentials => error_response(
            StatusCode::UNAUTHORIZED,
            "invalid authentication credentials",
        ),
        other => server_error(&other.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn failed_validation(errors: ValidationErrors) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "errors": errors })),
    )
        .into_response()
}

fn not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "the requested resource could not be found",
    )
}

// Logged inside the request span, which carries method and URI.
fn server_error(detail: &str) -> Response {
    error!(error = %detail, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE)
}

/// Turns a caught handler panic into a 500 and closes the connection.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    let mut res = server_error(&format!("panic: {detail}"));
    res.headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    res
}
