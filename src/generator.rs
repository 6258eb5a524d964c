//! The remote text-generation capability.
//!
//! Everything upstream of the resolver and the word-help pipeline is a single call:
//! a prompt goes in, free text comes out. [`TextGenerator`] is that seam, and
//! [`GeminiGenerator`] implements it against the Gemini `generateContent` REST endpoint.
use crate::client::HttpClient;
use crate::errors::GenerateError;
use async_trait::async_trait;
use axum::http::{Method, Uri};
use bon::Builder;
use hyper::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Upstream responses larger than this are treated as malformed.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

#[async_trait]
pub trait TextGenerator: fmt::Debug + Send + Sync {
    /// Sends `prompt` to `model` and returns the generated text.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerateError>;
}

/// Runs one generation call, failing with [`GenerateError::Timeout`] once `limit` elapses.
pub async fn generate_within<G>(
    generator: &G,
    model: &str,
    prompt: &str,
    limit: Duration,
) -> Result<String, GenerateError>
where
    G: TextGenerator + ?Sized,
{
    match tokio::time::timeout(limit, generator.generate(model, prompt)).await {
        Ok(result) => result,
        Err(_) => Err(GenerateError::Timeout(limit)),
    }
}

/// Request body of `models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct GenerateContentRequest {
    pub(crate) contents: Vec<Content>,
}

impl GenerateContentRequest {
    pub(crate) fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: None,
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) role: Option<String>,
    #[serde(default)]
    pub(crate) parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    pub(crate) content: Option<Content>,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    pub(crate) block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl GenerateContentResponse {
    /// The text of the first candidate, with its parts concatenated.
    pub(crate) fn into_text(self) -> Result<String, GenerateError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            return match block_reason {
                Some(reason) => Err(GenerateError::Malformed(format!(
                    "prompt was blocked: {reason}"
                ))),
                None => Err(GenerateError::EmptyResponse),
            };
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            if let Some(reason) = candidate.finish_reason {
                debug!(finish_reason = %reason, "Candidate carried no text");
            }
            return Err(GenerateError::EmptyResponse);
        }
        Ok(text)
    }
}

/// A [`TextGenerator`] backed by the Gemini REST API.
#[derive(Clone, Builder)]
pub struct GeminiGenerator<T: HttpClient> {
    http_client: T,
    #[builder(into)]
    api_key: String,
    #[builder(default = Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL"))]
    api_base: Url,
}

impl<T: HttpClient> fmt::Debug for GeminiGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("http_client", &self.http_client)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base.as_str())
            .finish()
    }
}

impl<T: HttpClient> GeminiGenerator<T> {
    /// Identifiers may be written with or without the `models/` prefix.
    fn endpoint(&self, model: &str) -> Result<Uri, GenerateError> {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let uri = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base.as_str().trim_end_matches('/'),
            model
        );
        Uri::try_from(uri.as_str())
            .map_err(|e| GenerateError::Transport(format!("invalid endpoint {uri}: {e}")))
    }
}

#[async_trait]
impl<T> TextGenerator for GeminiGenerator<T>
where
    T: HttpClient + Send + Sync,
{
    #[instrument(skip(self, prompt))]
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerateError> {
        let body = serde_json::to_vec(&GenerateContentRequest::from_prompt(prompt))
            .map_err(|e| GenerateError::Malformed(e.to_string()))?;

        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri(self.endpoint(model)?)
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, self.api_key.as_str())
            .body(axum::body::Body::from(body))
            .map_err(|e| GenerateError::Transport(e.to_string()))?;

        let response = self
            .http_client
            .request(req)
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&bytes)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            warn!(model, status = status.as_u16(), "Generation request rejected");
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_slice(&bytes)
            .map_err(|e| GenerateError::Malformed(e.to_string()))?;
        parsed.into_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, ScriptedGenerator};
    use axum::http::StatusCode;
    use serde_json::json;

    fn generator(client: MockHttpClient) -> GeminiGenerator<MockHttpClient> {
        GeminiGenerator::builder()
            .http_client(client)
            .api_key("test-key")
            .api_base("https://gemini.example.com".parse().unwrap())
            .build()
    }

    fn text_response(text: &str) -> String {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_request_shape() {
        let client = MockHttpClient::new(StatusCode::OK, &text_response("Hi"));
        let text = generator(client.clone())
            .generate("gemini-pro", "Say hi in one word")
            .await
            .unwrap();
        assert_eq!(text, "Hi");

        let requests = client.get_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(
            request.uri,
            "https://gemini.example.com/v1beta/models/gemini-pro:generateContent"
        );

        let key_header = request
            .headers
            .iter()
            .find(|(key, _)| key == API_KEY_HEADER)
            .map(|(_, value)| value);
        assert_eq!(key_header, Some(&"test-key".to_string()));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(
            body,
            json!({"contents": [{"parts": [{"text": "Say hi in one word"}]}]})
        );
    }

    #[tokio::test]
    async fn test_models_prefix_is_stripped() {
        let client = MockHttpClient::new(StatusCode::OK, &text_response("Hi"));
        generator(client.clone())
            .generate("models/gemini-2.5-flash", "ping")
            .await
            .unwrap();
        assert_eq!(
            client.get_requests()[0].uri,
            "https://gemini.example.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_parts_are_concatenated() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "A cat "}, {"text": "purrs."}]}}]
        })
        .to_string();
        let client = MockHttpClient::new(StatusCode::OK, &body);
        let text = generator(client).generate("m", "p").await.unwrap();
        assert_eq!(text, "A cat purrs.");
    }

    #[tokio::test]
    async fn test_upstream_error_message_is_kept() {
        let body = json!({
            "error": {"code": 404, "message": "models/gemini-pro is not found", "status": "NOT_FOUND"}
        })
        .to_string();
        let client = MockHttpClient::new(StatusCode::NOT_FOUND, &body);
        let err = generator(client).generate("gemini-pro", "p").await.unwrap_err();
        match err {
            GenerateError::Upstream { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "models/gemini-pro is not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_text_is_an_error() {
        let client = MockHttpClient::new(StatusCode::OK, &text_response("   "));
        let err = generator(client).generate("m", "p").await.unwrap_err();
        assert!(matches!(err, GenerateError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_reported() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string();
        let client = MockHttpClient::new(StatusCode::OK, &body);
        let err = generator(client).generate("m", "p").await.unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let client = MockHttpClient::new(StatusCode::OK, "<html>oops</html>");
        let err = generator(client).generate("m", "p").await.unwrap_err();
        assert!(matches!(err, GenerateError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_debug_redacts_key() {
        let client = MockHttpClient::new(StatusCode::OK, "{}");
        let debug = format!("{:?}", generator(client));
        assert!(!debug.contains("test-key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_within_times_out() {
        let generator = ScriptedGenerator::new().stall_model("slow");
        let err = generate_within(&generator, "slow", "p", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Timeout(d) if d == Duration::from_secs(5)));
    }
}
