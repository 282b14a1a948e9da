use std::borrow::Cow;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::{event, Level};

/// An error that can be reported back across the `Context` boundary.
///
/// Implementors supply a status code, a short machine-readable kind, and (via
/// [`HttpError::response_body`]) one of the two wire shapes this crate's error taxonomy uses.
pub trait HttpError: ToString + std::fmt::Debug {
    /// The status code that should accompany this error.
    fn status_code(&self) -> StatusCode;
    /// An error code that may provide additional information to clients on how to behave in
    /// response to the error.
    fn error_kind(&self) -> &'static str;
    /// The response body for this error.
    fn response_body(&self) -> ErrorResponseData {
        ErrorResponseData::Message(MessageError::new(
            self.error_kind(),
            self.to_string(),
            Some(format!("{self:?}")),
        ))
    }

    /// The status code and data for this error. Most implementors of this trait will not
    /// need to override the default implementation.
    fn response_tuple(&self) -> (StatusCode, ErrorResponseData) {
        (self.status_code(), self.response_body())
    }

    /// Serialize this error to a JSON [`axum::response::Response`].
    fn to_response(&self) -> axum::response::Response {
        use axum::response::IntoResponse;
        let (code, json) = self.response_tuple();
        (code, Json(json)).into_response()
    }
}

/// The two wire shapes this crate's errors can take: a field-keyed map of validation messages,
/// or a single human message with a machine-readable kind.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ErrorResponseData {
    /// `{errors: {field: message, ...}}`, used for schema and script validation failures.
    Errors {
        /// The field-to-message map.
        errors: std::collections::BTreeMap<String, String>,
    },
    /// `{error: {kind, message, details}}`, used for not-found, forbidden, and store failures.
    Message(MessageError),
}

impl ErrorResponseData {
    /// Build the `{errors: {...}}` shape from a field-to-message map.
    pub fn errors(errors: std::collections::BTreeMap<String, String>) -> ErrorResponseData {
        ErrorResponseData::Errors { errors }
    }
}

/// A single message-shaped error body, logged at construction time so a client-visible error is
/// always also an operator-visible log line.
#[derive(Debug, Serialize)]
pub struct MessageError {
    error: ErrorDetails,
}

/// An error code and additional details.
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    kind: Cow<'static, str>,
    message: Cow<'static, str>,
    details: Option<String>,
}

impl MessageError {
    /// Create a new [`MessageError`] with the given error code and message.
    pub fn new(
        kind: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
        details: Option<String>,
    ) -> MessageError {
        let ret = MessageError {
            error: ErrorDetails {
                kind: kind.into(),
                message: message.into(),
                details,
            },
        };

        event!(Level::ERROR, kind=%ret.error.kind, message=%ret.error.message, details=?ret.error.details);

        ret
    }
}

/// Errors that can flow out of the lifecycle orchestrator.
///
/// Each variant maps to one of the two wire shapes documented on [`ErrorResponseData`]: the
/// validation-errors map, or a single message. `error_stack::Report<CollectionError>` is the
/// return type of every fallible orchestrator method, so `change_context` can attach
/// pipeline-stage context ("while committing put") as the report propagates.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// Schema or script-reported validation failures, keyed by field name.
    #[error("validation failed")]
    Validation(std::collections::BTreeMap<String, String>),
    /// A root-only virtual route was hit by a non-root session.
    #[error("Must be root to {0}")]
    RootRequired(&'static str),
    /// An id-scoped read found nothing.
    #[error("not found")]
    NotFound,
    /// An id-scoped write's precondition read found nothing.
    #[error("{0}")]
    PreconditionFailed(&'static str),
    /// The caller's session is not permitted to perform this action.
    #[error("forbidden")]
    Forbidden,
    /// A script-runtime-level failure (not a value error) aborted the request.
    #[error("script failed: {0}")]
    ScriptFailed(String),
    /// The store adapter returned an error.
    #[error("store error: {0}")]
    Store(String),
}

impl HttpError for CollectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            CollectionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CollectionError::RootRequired(_) => StatusCode::FORBIDDEN,
            CollectionError::NotFound => StatusCode::NOT_FOUND,
            CollectionError::PreconditionFailed(_) => StatusCode::NOT_FOUND,
            CollectionError::Forbidden => StatusCode::FORBIDDEN,
            CollectionError::ScriptFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CollectionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_kind(&self) -> &'static str {
        match self {
            CollectionError::Validation(_) => "validation_failed",
            CollectionError::RootRequired(_) => "root_required",
            CollectionError::NotFound => "not_found",
            CollectionError::PreconditionFailed(_) => "precondition_failed",
            CollectionError::Forbidden => "forbidden",
            CollectionError::ScriptFailed(_) => "script_failed",
            CollectionError::Store(_) => "store_error",
        }
    }

    fn response_body(&self) -> ErrorResponseData {
        match self {
            CollectionError::Validation(errors) => {
                event!(Level::ERROR, kind = "validation_failed", fields = ?errors);
                ErrorResponseData::errors(errors.clone())
            }
            other => ErrorResponseData::Message(MessageError::new(
                other.error_kind(),
                other.to_string(),
                Some(format!("{other:?}")),
            )),
        }
    }
}
