//! Configuration parsing and validation for the word-help server
//!
//! This module handles command-line argument parsing (with environment fallbacks) and
//! validation using clap. It defines the main configuration structure used by the binary.
use crate::errors::ConfigError;
use crate::resolver::ModelCandidates;
use clap::Parser;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Candidate models, most preferred first.
pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-pro",
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash-002",
    "models/gemini-1.5-flash",
    "models/gemini-pro",
    "models/gemini-2.5-flash-image",
    "models/gemini-3-pro-image-preview",
    "models/gemini-2.5-flash",
];

#[derive(Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the word-help server will listen.
    #[arg(short = 'p', long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// API key for the generative-text service.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,

    /// Base URL of the generative-text service.
    #[arg(
        long,
        env = "GEMINI_API_BASE",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub api_base: Url,

    /// Candidate model identifiers, tried in order until one answers a probe.
    #[arg(
        long,
        env = "KINDRED_MODELS",
        value_delimiter = ',',
        default_values_t = DEFAULT_MODELS.iter().map(|m| m.to_string()).collect::<Vec<_>>()
    )]
    pub models: Vec<String>,

    /// Upper bound (in seconds) for each probe call during model resolution.
    #[arg(long, default_value_t = 10)]
    pub probe_timeout_secs: u64,

    /// Upper bound (in seconds) for each definition or image-prompt call.
    #[arg(long, default_value_t = 30)]
    pub generation_timeout_secs: u64,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = true)]
    pub metrics: bool,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "kindred")]
    pub metrics_prefix: String,

    /// Maximum number of idle HTTP connections to keep alive per upstream host.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

// Hand-written so the API key never reaches the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base.as_str())
            .field("models", &self.models)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("generation_timeout_secs", &self.generation_timeout_secs)
            .field("metrics_port", &self.metrics_port)
            .field("metrics", &self.metrics)
            .field("metrics_prefix", &self.metrics_prefix)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout_secs", &self.pool_idle_timeout_secs)
            .finish()
    }
}

impl Config {
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        self.models = self
            .models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if self.models.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        Ok(self)
    }

    pub fn candidates(&self) -> Result<ModelCandidates, ConfigError> {
        ModelCandidates::new(self.models.clone())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}
