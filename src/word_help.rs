//! The word-help pipeline: one word in, a child-friendly definition and an
//! illustration prompt out.
use crate::errors::{GenerationFailure, Stage, ValidationError};
use crate::generator::{TextGenerator, generate_within};
use crate::models::{DefinitionResult, ImagePromptResult, WordHelpResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub fn definition_prompt(word: &str) -> String {
    format!(
        "You are a friendly teacher. Explain the word \"{word}\" to a 5-year-old child in ONE simple, fun sentence. Keep it under 25 words."
    )
}

pub fn image_prompt(word: &str) -> String {
    format!(
        "Describe a colorful, friendly cartoon image of \"{word}\" for children. One sentence, under 25 words."
    )
}

/// Trims the raw input, rejecting words that are empty afterwards.
pub fn validate_word(raw: &str) -> Result<String, ValidationError> {
    let word = raw.trim();
    if word.is_empty() {
        return Err(ValidationError::EmptyWord);
    }
    Ok(word.to_string())
}

/// Runs the definition and image-prompt stages against an already resolved model.
///
/// The orchestrator never touches the resolver; callers pass the resolved identifier in.
pub struct WordHelpOrchestrator<G: ?Sized> {
    generator: Arc<G>,
    generation_timeout: Duration,
}

impl<G: ?Sized> Clone for WordHelpOrchestrator<G> {
    fn clone(&self) -> Self {
        Self {
            generator: Arc::clone(&self.generator),
            generation_timeout: self.generation_timeout,
        }
    }
}

impl<G: ?Sized> std::fmt::Debug for WordHelpOrchestrator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordHelpOrchestrator")
            .field("generation_timeout", &self.generation_timeout)
            .finish_non_exhaustive()
    }
}

impl<G> WordHelpOrchestrator<G>
where
    G: TextGenerator + ?Sized,
{
    pub fn new(generator: Arc<G>, generation_timeout: Duration) -> Self {
        Self {
            generator,
            generation_timeout,
        }
    }

    /// Definition first, then image prompt. The first failing stage ends the request and the
    /// other stage's text, if any, is dropped.
    #[instrument(skip(self))]
    pub async fn get_word_help(
        &self,
        word: &str,
        model: &str,
    ) -> Result<WordHelpResult, GenerationFailure> {
        info!("Processing word");
        let definition = self
            .run_stage(Stage::Definition, model, &definition_prompt(word))
            .await?;
        let image_prompt = self
            .run_stage(Stage::ImagePrompt, model, &image_prompt(word))
            .await?;

        Ok(WordHelpResult {
            word: word.to_string(),
            definition,
            image_prompt,
        })
    }

    #[instrument(skip(self))]
    pub async fn define(
        &self,
        word: &str,
        model: &str,
    ) -> Result<DefinitionResult, GenerationFailure> {
        let definition = self
            .run_stage(Stage::Definition, model, &definition_prompt(word))
            .await?;
        Ok(DefinitionResult {
            word: word.to_string(),
            definition,
        })
    }

    #[instrument(skip(self))]
    pub async fn describe_image(
        &self,
        word: &str,
        model: &str,
    ) -> Result<ImagePromptResult, GenerationFailure> {
        let image_prompt = self
            .run_stage(Stage::ImagePrompt, model, &image_prompt(word))
            .await?;
        Ok(ImagePromptResult {
            word: word.to_string(),
            image_prompt,
        })
    }

    async fn run_stage(
        &self,
        stage: Stage,
        model: &str,
        prompt: &str,
    ) -> Result<String, GenerationFailure> {
        debug!(%stage, "Requesting generation");
        let text = generate_within(&*self.generator, model, prompt, self.generation_timeout)
            .await
            .map_err(|e| {
                warn!(%stage, error = %e, "Generation stage failed");
                GenerationFailure::from_generate(stage, &e)
            })?;

        let text = text.trim();
        if text.is_empty() {
            warn!(%stage, "Generation stage returned blank text");
            return Err(GenerationFailure::new(stage, "generation service returned no text"));
        }
        debug!(%stage, "Generation stage complete");
        Ok(text.to_string())
    }
}
