//! Application error types and HTTP response mapping.
//!
//! Defines `AppError` for every request-local failure and implements Axum's
//! `IntoResponse` so handlers can return `Result<Response>` directly. Bodies
//! are plain text so clients can show them verbatim.
//!
//! Error mappings:
//! - `RepoNotFound`, `NotFound` → 404
//! - `NotANumber`, `UnknownFormat`, `InvalidArgument`, unsafe arguments → 400
//! - `MethodNotAllowed` → 405
//! - `Command`, `Decode`, `Io` → 500

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::git::command::CommandError;
use crate::git::history::DecodeError;

pub const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No such repository {0}")]
    RepoNotFound(String),

    #[error("Not a number: {0}")]
    NotANumber(String),

    #[error("Unknown format {0}")]
    UnknownFormat(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RepoNotFound(_) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::NotANumber(_)
            | AppError::UnknownFormat(_)
            | AppError::InvalidArgument(_)
            | AppError::Command(CommandError::UnsafeArgument(_)) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Command(_) | AppError::Decode(_) | AppError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> String {
        match self {
            AppError::Command(e) => match e.stderr() {
                Some(stderr) if !stderr.is_empty() => format!("{}\n{}\n", e, stderr.trim_end()),
                _ => format!("{}\n", e),
            },
            AppError::Decode(e) => format!("{}\n{}\n", e, e.raw()),
            other => format!("{}\n", other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let mut response = (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], self.body()).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn not_found_repository_body() {
        let (status, body) = body_of(AppError::RepoNotFound("team/x".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "No such repository team/x\n");
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let (status, body) = body_of(AppError::NotANumber("abc".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Not a number: abc\n");

        let (status, body) = body_of(AppError::UnknownFormat("xyz".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Unknown format xyz\n");
    }

    #[tokio::test]
    async fn method_not_allowed_sets_allow_header() {
        let response = AppError::MethodNotAllowed.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");
    }
}
