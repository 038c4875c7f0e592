//! HTTP-facing errors.
//!
//! Components report their own error types; handlers translate them into
//! [`ServeError`], which only ever shows the client a status and a short
//! message. Details stay in the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use maud::html;
use thiserror::Error;
use tracing::error;

use crate::{archive::ArchiveError, listing::ListingError, markdown::MarkdownError};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::NotFound(_) => StatusCode::NOT_FOUND,
            ServeError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ServeError::NotFound(msg)
            | ServeError::Forbidden(msg)
            | ServeError::BadRequest(msg)
            | ServeError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        error_response(self.status(), self.message())
    }
}

/// Helper to generate consistent Maud-based error responses.
pub fn error_response(status_code: StatusCode, message: &str) -> Response {
    let markup = html! {
        div style="padding: 10px; border: 1px solid red; color: red; margin: 10px;" {
            h2 { "Error " (status_code.as_u16()) }
            p { (message) }
        }
    };
    (status_code, markup).into_response()
}

impl From<ArchiveError> for ServeError {
    fn from(err: ArchiveError) -> Self {
        error!("Archive build failed: {}", err);
        ServeError::Internal("Failed to create ZIP file.")
    }
}

impl From<ListingError> for ServeError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::Unreadable { path, source } => {
                error!("Failed to list directory {}: {}", path.display(), source);
                if source.kind() == std::io::ErrorKind::PermissionDenied {
                    ServeError::Forbidden("No permission to list directory.")
                } else {
                    ServeError::NotFound("Directory could not be listed.")
                }
            }
        }
    }
}

impl From<MarkdownError> for ServeError {
    fn from(err: MarkdownError) -> Self {
        error!("Markdown rendering failed: {}", err);
        match err {
            MarkdownError::Decode(_) => ServeError::BadRequest("File encoding error."),
            MarkdownError::Unavailable => {
                ServeError::Internal("Markdown rendering is not available.")
            }
        }
    }
}
