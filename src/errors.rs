//! Error types for configuration, remote generation and the word-help HTTP boundary.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Problems with the startup configuration. These are fatal: the service never becomes ready.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is missing or blank")]
    MissingCredential,

    #[error("at least one candidate model must be configured")]
    NoCandidates,
}

/// The failure of a single call to the remote text-generation service.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("request to generation service failed: {0}")]
    Transport(String),

    #[error("generation service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed response from generation service: {0}")]
    Malformed(String),

    #[error("generation service returned no text")]
    EmptyResponse,

    #[error("generation call timed out after {0:?}")]
    Timeout(Duration),
}

/// Which step of the pipeline a [`GenerationFailure`] comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Resolution,
    Definition,
    ImagePrompt,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolution => "resolution",
            Stage::Definition => "definition",
            Stage::ImagePrompt => "imagePrompt",
        };
        f.write_str(name)
    }
}

/// A stage-tagged failure. Never accompanied by a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct GenerationFailure {
    pub stage: Stage,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Wraps the error of one remote call, keeping its message for diagnostics.
    pub fn from_generate(stage: Stage, error: &GenerateError) -> Self {
        Self::new(stage, error.to_string())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Word is required")]
    EmptyWord,
}

/// Errors surfaced by the word-help endpoints, rendered as JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Failed(#[from] GenerationFailure),
}

pub const NOT_READY_MESSAGE: &str =
    "Model initialization in progress. Please try again in a few seconds.";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(e) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
            }
            // No model to run against yet; retry later.
            ApiError::Failed(GenerationFailure {
                stage: Stage::Resolution,
                message,
            }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Server not ready",
                    "message": message,
                    "stage": Stage::Resolution,
                })),
            )
                .into_response(),
            ApiError::Failed(failure) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to process word",
                    "message": failure.message,
                    "stage": failure.stage,
                })),
            )
                .into_response(),
        }
    }
}
