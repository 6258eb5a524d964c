//! Model resolver - finds the first candidate model the configured key can actually call
//!
//! Which models answer depends on the account, the region and the API version, so it is
//! discovered at runtime: each candidate gets a tiny probe prompt, in order, and the first
//! one to answer is cached until [`ModelResolver::reset`] is called.

use crate::errors::{ConfigError, GenerateError, GenerationFailure, Stage};
use crate::generator::{TextGenerator, generate_within};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{Instrument, debug, error, info, instrument, trace, warn};

pub const PROBE_PROMPT: &str = "Say hi in one word";

pub const DIAGNOSTIC_PROMPT: &str = "Say hello in one word";

const EXHAUSTED_MESSAGE: &str = "No working model found. Please verify your API key at https://aistudio.google.com/app/apikey";

/// Ordered, non-empty list of model identifiers. Earlier entries are preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidates(Vec<String>);

impl ModelCandidates {
    pub fn new<I, S>(ids: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        Ok(Self(ids))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

}

/// Where the resolver is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    /// Nothing has been probed yet, or the resolver was reset
    Unset,
    /// A probe sequence is running
    Probing,
    /// A candidate answered its probe
    Resolved { model: String },
    /// Every candidate failed its probe
    Exhausted,
}

struct ResolverInner<G: ?Sized> {
    candidates: ModelCandidates,
    probe_timeout: Duration,
    state: RwLock<ResolutionState>,
    /// Held for the whole of a probe sequence.
    resolve_lock: Mutex<()>,
    /// Number of finished probe sequences.
    attempts: AtomicU64,
    generator: Arc<G>,
}

/// Discovers and caches the working model. Cheap to clone; clones share state.
pub struct ModelResolver<G: ?Sized> {
    inner: Arc<ResolverInner<G>>,
}

impl<G: ?Sized> Clone for ModelResolver<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: ?Sized> std::fmt::Debug for ModelResolver<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResolver")
            .field("candidates", &self.inner.candidates)
            .field("probe_timeout", &self.inner.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl<G> ModelResolver<G>
where
    G: TextGenerator + ?Sized,
{
    pub fn new(generator: Arc<G>, candidates: ModelCandidates, probe_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                candidates,
                probe_timeout,
                state: RwLock::new(ResolutionState::Unset),
                resolve_lock: Mutex::new(()),
                attempts: AtomicU64::new(0),
                generator,
            }),
        }
    }

    pub async fn state(&self) -> ResolutionState {
        self.inner.state.read().await.clone()
    }

    /// The resolved model, if any. Never probes.
    pub async fn current(&self) -> Option<String> {
        match &*self.inner.state.read().await {
            ResolutionState::Resolved { model } => Some(model.clone()),
            _ => None,
        }
    }

    /// Runs one probe sequence under the resolve lock. `seen` is the attempt count the caller
    /// observed before queueing.
    async fn do_resolve(&self, seen: u64) -> Result<String, GenerationFailure> {
        let _guard = self.inner.resolve_lock.lock().await;

        // Double-check state
        match &*self.inner.state.read().await {
            ResolutionState::Resolved { model } => {
                debug!(model = %model, "Adopting result of concurrent resolution");
                return Ok(model.clone());
            }
            ResolutionState::Exhausted if self.inner.attempts.load(Ordering::SeqCst) != seen => {
                debug!("Concurrent resolution found no working model");
                return Err(exhausted());
            }
            _ => {}
        }

        *self.inner.state.write().await = ResolutionState::Probing;
        info!(
            candidates = ?self.inner.candidates,
            "Auto-detecting working model"
        );

        let outcome = self.probe_candidates().await;

        *self.inner.state.write().await = match &outcome {
            Some(model) => ResolutionState::Resolved {
                model: model.clone(),
            },
            None => ResolutionState::Exhausted,
        };
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Some(model) => {
                info!(model = %model, "Resolved working model");
                Ok(model)
            }
            None => {
                error!("No candidate model answered its probe");
                Err(exhausted())
            }
        }
    }

    /// Forgets the resolved model so the next [`resolve`](Self::resolve) probes again.
    ///
    /// Returns `false` without changing anything while a probe sequence is running.
    pub async fn reset(&self) -> bool {
        let Ok(_guard) = self.inner.resolve_lock.try_lock() else {
            warn!("Reset requested while resolution is in progress; ignoring");
            return false;
        };
        let previous = std::mem::replace(
            &mut *self.inner.state.write().await,
            ResolutionState::Unset,
        );
        info!(previous = ?previous, "Model resolution reset");
        true
    }

    /// Sends the diagnostic prompt to `model` and returns the raw reply.
    pub async fn ping(&self, model: &str) -> Result<String, GenerateError> {
        generate_within(
            &*self.inner.generator,
            model,
            DIAGNOSTIC_PROMPT,
            self.inner.probe_timeout,
        )
        .await
    }

    async fn probe_candidates(&self) -> Option<String> {
        for (position, model) in self.inner.candidates.iter().enumerate() {
            debug!(model, position, "Testing candidate");
            match generate_within(
                &*self.inner.generator,
                model,
                PROBE_PROMPT,
                self.inner.probe_timeout,
            )
            .await
            {
                Ok(reply) => {
                    debug!(model, reply = reply.trim(), "Candidate answered probe");
                    return Some(model.to_string());
                }
                Err(e) => {
                    warn!(model, error = %e, "Candidate failed probe");
                }
            }
        }
        None
    }
}

impl<G> ModelResolver<G>
where
    G: TextGenerator + ?Sized + 'static,
{
    /// Returns the working model, probing candidates first if none is cached.
    ///
    /// At most one probe sequence runs at a time. A caller that queued behind a running
    /// sequence gets that sequence's outcome rather than starting another. The sequence runs
    /// on its own task, so it still completes if the caller goes away.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<String, GenerationFailure> {
        let seen = self.inner.attempts.load(Ordering::SeqCst);

        // Fast path: already resolved
        if let Some(model) = self.current().await {
            trace!(model = %model, "Model already resolved");
            return Ok(model);
        }

        let resolver = self.clone();
        tokio::spawn(async move { resolver.do_resolve(seen).await }.in_current_span())
            .await
            .map_err(|e| {
                error!(error = %e, "Resolution task failed");
                GenerationFailure::new(Stage::Resolution, format!("resolution task failed: {e}"))
            })?
    }
}

fn exhausted() -> GenerationFailure {
    GenerationFailure::new(Stage::Resolution, EXHAUSTED_MESSAGE)
}
