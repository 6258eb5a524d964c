/// JSON bodies of the word-help HTTP API.
use serde::{Deserialize, Serialize};

/// Body of the three word endpoints. A missing `word` is treated like an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WordHelpRequest {
    #[serde(default)]
    pub word: Option<String>,
}

/// A definition and an illustration prompt for one word. Only built when both stages succeed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WordHelpResult {
    pub word: String,
    pub definition: String,
    pub image_prompt: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DefinitionResult {
    pub word: String,
    pub definition: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePromptResult {
    pub word: String,
    pub image_prompt: String,
}

/// Response of `GET /health`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "healthy": the process is up, even while the model is still being resolved.
    pub status: String,
    /// The resolved model, or "initializing".
    pub model: String,
    pub credential_present: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Response of the operator diagnostic `GET /test`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DiagnosticResponse {
    Success {
        success: bool,
        message: String,
        model: String,
        response: String,
    },
    Failure {
        success: bool,
        error: String,
    },
}

impl DiagnosticResponse {
    pub fn success(model: String, response: String) -> Self {
        DiagnosticResponse::Success {
            success: true,
            message: "API key is working!".into(),
            model,
            response,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        DiagnosticResponse::Failure {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosticQuery {
    /// Forget the resolved model and probe candidates again before testing.
    #[serde(default)]
    pub reset: bool,
}
