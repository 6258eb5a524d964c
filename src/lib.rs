//! Kindred - the word-help backend of a children's reading aid
//!
//! A reader clicks a word; this service answers with a child-friendly definition and a
//! prompt for an illustration of it, both written by a generative-text model. Which model
//! is usable with the configured API key is discovered once at startup by the
//! [`resolver`], and each word then goes through the two-stage [`word_help`] pipeline.

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

pub mod client;
pub mod config;
pub mod errors;
pub mod generator;
pub mod handlers;
pub mod models;
pub mod resolver;
pub mod word_help;

use client::{HyperClient, PoolConfig};
use config::Config;
use errors::ConfigError;
use generator::{GeminiGenerator, TextGenerator};
use resolver::{ModelCandidates, ModelResolver};
use word_help::WordHelpOrchestrator;

/// The main application state: the shared resolver and the word-help pipeline
pub struct AppState<G: ?Sized> {
    pub resolver: ModelResolver<G>,
    pub orchestrator: WordHelpOrchestrator<G>,
    pub credential_present: bool,
}

impl<G: ?Sized> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            orchestrator: self.orchestrator.clone(),
            credential_present: self.credential_present,
        }
    }
}

impl<G: ?Sized> std::fmt::Debug for AppState<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("resolver", &self.resolver)
            .field("orchestrator", &self.orchestrator)
            .field("credential_present", &self.credential_present)
            .finish()
    }
}

impl AppState<GeminiGenerator<HyperClient>> {
    /// Create a new AppState talking to Gemini over the default Hyper client
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let http_client = client::create_hyper_client(PoolConfig {
            max_idle_per_host: config.pool_max_idle_per_host,
            idle_timeout: Duration::from_secs(config.pool_idle_timeout_secs),
        });
        let generator = GeminiGenerator::builder()
            .http_client(http_client)
            .api_key(config.api_key.clone())
            .api_base(config.api_base.clone())
            .build();

        let mut state = Self::with_generator(
            Arc::new(generator),
            config.candidates()?,
            config.probe_timeout(),
            config.generation_timeout(),
        );
        state.credential_present = !config.api_key.trim().is_empty();
        Ok(state)
    }
}

impl<G> AppState<G>
where
    G: TextGenerator + ?Sized,
{
    /// Create a new AppState around any generator (useful for testing)
    pub fn with_generator(
        generator: Arc<G>,
        candidates: ModelCandidates,
        probe_timeout: Duration,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            resolver: ModelResolver::new(Arc::clone(&generator), candidates, probe_timeout),
            orchestrator: WordHelpOrchestrator::new(generator, generation_timeout),
            credential_present: true,
        }
    }
}

/// Build the main router
/// This creates routes for:
/// - `/api/word-help` - Definition and illustration prompt for a word
/// - `/api/define-word`, `/api/generate-image-prompt` - Each stage on its own
/// - `/health` - Liveness plus the resolved model
/// - `/test` - Operator diagnostic against the remote service
#[instrument(skip(state))]
pub fn build_router<G>(state: AppState<G>) -> Router
where
    G: TextGenerator + ?Sized + 'static,
{
    info!("Building router");
    Router::new()
        .route("/api/word-help", post(handlers::word_help::<G>))
        .route("/api/define-word", post(handlers::define_word::<G>))
        .route(
            "/api/generate-image-prompt",
            post(handlers::generate_image_prompt::<G>),
        )
        .route("/health", get(handlers::health::<G>))
        .route("/test", get(handlers::diagnostic::<G>))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

/// The reading UI is served from a different origin, so every response allows any origin
/// and preflight requests are answered directly.
async fn allow_any_origin(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type"),
        );
        return response;
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// `prefix` is prepended to every metric name; it must live for the whole program, as
/// required by the Prometheus metrics layer.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::errors::GenerateError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    pub struct MockHttpClient {
        pub requests: Arc<Mutex<Vec<MockRequest>>>,
        response_builder: Arc<dyn Fn() -> axum::response::Response + Send + Sync>,
    }

    #[derive(Debug, Clone)]
    pub struct MockRequest {
        pub method: String,
        pub uri: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl MockHttpClient {
        pub fn new(status: StatusCode, body: &str) -> Self {
            let body = body.to_string();
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                response_builder: Arc::new(move || {
                    axum::response::Response::builder()
                        .status(status)
                        .header("content-type", "application/json")
                        .body(axum::body::Body::from(body.clone()))
                        .unwrap()
                }),
            }
        }

        pub fn get_requests(&self) -> Vec<MockRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl std::fmt::Debug for MockHttpClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockHttpClient")
                .field("requests", &self.requests)
                .field("response_builder", &"<closure>")
                .finish()
        }
    }

    impl Clone for MockHttpClient {
        fn clone(&self) -> Self {
            Self {
                requests: Arc::clone(&self.requests),
                response_builder: Arc::clone(&self.response_builder),
            }
        }
    }

    #[async_trait]
    impl crate::client::HttpClient for MockHttpClient {
        async fn request(
            &self,
            req: axum::extract::Request,
        ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let headers = req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .to_vec();

            self.requests.lock().unwrap().push(MockRequest {
                method,
                uri,
                headers,
                body,
            });

            Ok((self.response_builder)())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GeneratorCall {
        pub model: String,
        pub prompt: String,
    }

    #[derive(Debug, Clone)]
    enum Reply {
        Text(String),
        Fail(String),
    }

    /// A [`TextGenerator`] with canned behaviour that records every call it receives.
    ///
    /// Clones share the call log. Without a matching rule a call answers
    /// `"reply from <model>"`.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedGenerator {
        calls: Arc<Mutex<Vec<GeneratorCall>>>,
        failing_models: HashSet<String>,
        stalled_models: HashSet<String>,
        rules: Vec<(String, Reply)>,
        delay: Option<Duration>,
    }

    impl ScriptedGenerator {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call to `model` fails as if the model did not exist.
        pub fn fail_model(mut self, model: impl Into<String>) -> Self {
            self.failing_models.insert(model.into());
            self
        }

        /// Calls to `model` never complete.
        pub fn stall_model(mut self, model: impl Into<String>) -> Self {
            self.stalled_models.insert(model.into());
            self
        }

        /// Prompts containing `needle` get `text` back.
        pub fn reply_when(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
            self.rules.push((needle.into(), Reply::Text(text.into())));
            self
        }

        /// Prompts containing `needle` fail with `message`.
        pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
            self.rules.push((needle.into(), Reply::Fail(message.into())));
            self
        }

        /// Every call sleeps this long before answering.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> Vec<GeneratorCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerateError> {
            self.calls.lock().unwrap().push(GeneratorCall {
                model: model.to_string(),
                prompt: prompt.to_string(),
            });

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.stalled_models.contains(model) {
                std::future::pending::<()>().await;
            }
            if self.failing_models.contains(model) {
                return Err(GenerateError::Upstream {
                    status: 404,
                    message: format!("models/{model} is not found"),
                });
            }

            let rule = self
                .rules
                .iter()
                .find(|(needle, _)| prompt.contains(needle.as_str()));
            match rule {
                Some((_, Reply::Text(text))) => Ok(text.clone()),
                Some((_, Reply::Fail(message))) => Err(GenerateError::Upstream {
                    status: 500,
                    message: message.clone(),
                }),
                None => Ok(format!("reply from {model}")),
            }
        }
    }
}
