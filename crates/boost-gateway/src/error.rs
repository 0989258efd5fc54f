//! Gateway error types

use axum::http::StatusCode;
use boost_kernel::{NotBoostable, RerankError};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::Reply;

/// Failure of a route handler.
///
/// The pipeline turns every variant into a response: [`NotFound`] goes to
/// the service's not-found handler, the rest become a structured error body
/// `{"error": message, "type": kind}`.
///
/// [`NotFound`]: HandlerError::NotFound
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("not found")]
    NotFound,

    #[error("method '{0}' is not supported")]
    MethodNotAllowed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("upstream '{backend}' failed: {message}")]
    Upstream { backend: String, message: String },

    #[error(transparent)]
    Rerank(#[from] RerankError),

    #[error("request cannot be boosted: {0}")]
    NotBoostable(#[from] NotBoostable),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("handler panicked: {0}")]
    Panic(String),
}

impl HandlerError {
    /// Stable tag reported as `"type"` in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::NotFound => "NotFound",
            HandlerError::MethodNotAllowed(_) => "MethodNotAllowed",
            HandlerError::BadRequest(_) => "BadRequest",
            HandlerError::PayloadTooLarge(_) => "PayloadTooLarge",
            HandlerError::Upstream { .. } => "UpstreamError",
            HandlerError::Rerank(_) => "RerankError",
            HandlerError::NotBoostable(_) => "NotBoostable",
            HandlerError::Internal(_) => "InternalError",
            HandlerError::Panic(_) => "Panic",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::NotFound => StatusCode::NOT_FOUND,
            HandlerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            HandlerError::NotBoostable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HandlerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error body for this failure.
    pub fn to_reply(&self) -> Reply {
        let message = match self {
            HandlerError::NotFound => "not found".to_string(),
            other => other.to_string(),
        };
        Reply::json_with_status(
            self.status(),
            json!({ "error": message, "type": self.kind() }),
        )
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Worker lifecycle errors, as seen by the owner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    #[error("worker '{0}' has already been started")]
    AlreadyStarted(String),

    #[error("failed to spawn thread for worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker '{name}' did not become ready within {timeout:?}")]
    ReadyTimeout { name: String, timeout: Duration },

    #[error("worker '{0}' exited before becoming ready")]
    Exited(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_tags() {
        assert_eq!(HandlerError::NotFound.kind(), "NotFound");
        assert_eq!(HandlerError::Internal("x".into()).kind(), "InternalError");
        assert_eq!(
            HandlerError::Upstream {
                backend: "es".into(),
                message: "refused".into()
            }
            .kind(),
            "UpstreamError"
        );
        assert_eq!(
            HandlerError::from(NotBoostable::MissingField("query")).kind(),
            "NotBoostable"
        );
    }

    #[test]
    fn statuses() {
        assert_eq!(HandlerError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(HandlerError::Panic("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HandlerError::BadRequest("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HandlerError::PayloadTooLarge(16).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            HandlerError::from(NotBoostable::MissingField("query")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn not_found_body_is_fixed() {
        let reply = HandlerError::NotFound.to_reply();
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(body, json!({ "error": "not found", "type": "NotFound" }));
    }
}
