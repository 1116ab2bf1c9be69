use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a model name into a loaded artifact.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model {name:?} not found under {dir:?}")]
    NotFound { name: String, dir: PathBuf },

    #[error("failed to load model from {path:?}")]
    Backend {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot read models directory {dir:?}")]
    Directory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no default model loaded, and no model specified")]
    NoDefault,

    #[error("cannot resolve model {name:?}: {source}")]
    Load {
        name: String,
        #[source]
        source: LoadError,
    },
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no prompt template available for {0:?}")]
    Missing(String),

    #[error("unsupported template action {0:?}")]
    Unsupported(String),

    #[error("unterminated template action")]
    Unterminated,

    #[error("read template {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Request-level failure, rendered as an OpenAI-style error body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    ModelResolution(#[from] ResolveError),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("cannot list models: {0}")]
    Listing(#[source] LoadError),

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::MalformedRequest(_) => "invalid_request_error",
            ApiError::ModelResolution(ResolveError::NoDefault) => "invalid_request_error",
            ApiError::ModelResolution(_) => "model_error",
            ApiError::Generation(_) => "generation_error",
            ApiError::Listing(_) | ApiError::Internal(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelResolution(ResolveError::NoDefault) => StatusCode::BAD_REQUEST,
            ApiError::ModelResolution(ResolveError::Load {
                source: LoadError::NotFound { .. },
                ..
            }) => StatusCode::NOT_FOUND,
            ApiError::ModelResolution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Generation(_) | ApiError::Listing(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        metrics::counter!("llama_gate_request_errors_total", "kind" => kind).increment(1);
        tracing::warn!(error = %self, kind, "request failed");
        let body = json!({ "error": { "message": self.to_string(), "type": kind } });
        (self.status(), Json(body)).into_response()
    }
}
