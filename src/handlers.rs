/// Axum handlers for the word-help server
use crate::AppState;
use crate::errors::{ApiError, GenerationFailure, NOT_READY_MESSAGE, Stage, ValidationError};
use crate::generator::TextGenerator;
use crate::models::{
    DefinitionResult, DiagnosticQuery, DiagnosticResponse, HealthResponse, ImagePromptResult,
    WordHelpRequest, WordHelpResult,
};
use crate::word_help::validate_word;
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::{debug, error, info, instrument, warn};

/// Pulls a usable word out of the body. Unparseable bodies count as a missing word.
fn requested_word(body: Result<Json<WordHelpRequest>, JsonRejection>) -> Result<String, ApiError> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected request body");
            return Err(ValidationError::EmptyWord.into());
        }
    };
    Ok(validate_word(request.word.as_deref().unwrap_or_default())?)
}

/// The resolved model, or a resolution-stage failure while there is none.
async fn ready_model<G>(state: &AppState<G>) -> Result<String, GenerationFailure>
where
    G: TextGenerator + ?Sized,
{
    match state.resolver.current().await {
        Some(model) => Ok(model),
        None => {
            warn!("Request arrived before a model was resolved");
            Err(GenerationFailure::new(Stage::Resolution, NOT_READY_MESSAGE))
        }
    }
}

/// Definition and illustration prompt for one word
#[instrument(skip(state, body))]
pub async fn word_help<G>(
    State(state): State<AppState<G>>,
    body: Result<Json<WordHelpRequest>, JsonRejection>,
) -> Result<Json<WordHelpResult>, ApiError>
where
    G: TextGenerator + ?Sized + 'static,
{
    let word = requested_word(body)?;
    let model = ready_model(&state).await?;
    info!(word = %word, model = %model, "Word help requested");

    match state.orchestrator.get_word_help(&word, &model).await {
        Ok(result) => Ok(Json(result)),
        Err(failure) => {
            error!(
                word = %word,
                stage = %failure.stage,
                error = %failure.message,
                "Error in word-help"
            );
            Err(failure.into())
        }
    }
}

#[instrument(skip(state, body))]
pub async fn define_word<G>(
    State(state): State<AppState<G>>,
    body: Result<Json<WordHelpRequest>, JsonRejection>,
) -> Result<Json<DefinitionResult>, ApiError>
where
    G: TextGenerator + ?Sized + 'static,
{
    let word = requested_word(body)?;
    let model = ready_model(&state).await?;
    Ok(Json(state.orchestrator.define(&word, &model).await?))
}

#[instrument(skip(state, body))]
pub async fn generate_image_prompt<G>(
    State(state): State<AppState<G>>,
    body: Result<Json<WordHelpRequest>, JsonRejection>,
) -> Result<Json<ImagePromptResult>, ApiError>
where
    G: TextGenerator + ?Sized + 'static,
{
    let word = requested_word(body)?;
    let model = ready_model(&state).await?;
    Ok(Json(state.orchestrator.describe_image(&word, &model).await?))
}

#[instrument(skip(state))]
pub async fn health<G>(State(state): State<AppState<G>>) -> Json<HealthResponse>
where
    G: TextGenerator + ?Sized + 'static,
{
    Json(HealthResponse {
        status: "healthy".into(),
        model: state
            .resolver
            .current()
            .await
            .unwrap_or_else(|| "initializing".into()),
        credential_present: state.credential_present,
        timestamp: chrono::Utc::now(),
    })
}

/// Operator troubleshooting: resolves a model if needed (or again, with `?reset=true`) and
/// sends it a trivial prompt.
#[instrument(skip(state))]
pub async fn diagnostic<G>(
    State(state): State<AppState<G>>,
    Query(query): Query<DiagnosticQuery>,
) -> (StatusCode, Json<DiagnosticResponse>)
where
    G: TextGenerator + ?Sized + 'static,
{
    if query.reset && !state.resolver.reset().await {
        return (
            StatusCode::CONFLICT,
            Json(DiagnosticResponse::failure(
                "Model resolution is already in progress",
            )),
        );
    }

    let model = match state.resolver.resolve().await {
        Ok(model) => model,
        Err(failure) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DiagnosticResponse::failure(failure.message)),
            );
        }
    };

    match state.resolver.ping(&model).await {
        Ok(response) => (
            StatusCode::OK,
            Json(DiagnosticResponse::success(model, response)),
        ),
        Err(e) => {
            error!(model = %model, error = %e, "Diagnostic call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DiagnosticResponse::failure(e.to_string())),
            )
        }
    }
}
