//! Configuration management for surge-crew.
//!
//! Configuration is read from environment variables:
//! - `GEMINI_API_KEYS` - Comma-separated pool of API keys. Falls back to `GEMINI_API_KEY`.
//! - `SURGE_MODELS` - Comma-separated model pool. Defaults to `gemini-2.0-flash,gemini-1.5-flash`.
//! - `MODEL_SELECTION` - `random` (default) or `round_robin`.
//! - `MAX_ATTEMPTS` - Attempts per task invocation. Defaults to `3`.
//! - `BACKOFF` - `exponential` (default), `fixed` or `none`.
//! - `BACKOFF_BASE_MS` / `BACKOFF_MAX_MS` - Backoff schedule. Defaults to `2000` / `60000`.
//! - `REQUEST_TIMEOUT_SECS` - Per-attempt backend timeout. Defaults to `60`.
//! - `TEMPERATURE` / `MAX_OUTPUT_TOKENS` - Generation defaults. `0.4` / `2048`.
//! - `GEMINI_BASE_URL` - Optional endpoint override.
//! - `OUTPUT_DIR` - Root for task artifacts. Defaults to the current directory.
//! - `RESULTS_DIR` - Where run records go. Defaults to `results`.
//! - `PIPELINE_CONFIG` - Optional YAML pipeline; the built-in pipeline is used otherwise.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::invoker::{Backoff, RetryPolicy};
use crate::llm::GenerationOptions;
use crate::pool::ModelSelection;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("{0} pool must contain at least one entry")]
    EmptyPool(&'static str),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),
}

const DEFAULT_MODELS: &str = "gemini-2.0-flash,gemini-1.5-flash";

/// Runtime configuration for a surge-crew process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API keys, in rotation order
    pub api_keys: Vec<String>,

    /// Backend model identifiers
    pub models: Vec<String>,

    /// How a model is drawn from the pool on each attempt
    pub model_selection: ModelSelection,

    /// Retry policy applied to every task invocation
    pub retry: RetryPolicy,

    /// Default generation options (agents may override)
    pub generation: GenerationOptions,

    /// Endpoint override for the Gemini client
    pub base_url: Option<String>,

    /// Root directory for task artifacts
    pub output_dir: PathBuf,

    /// Directory for run records
    pub results_dir: PathBuf,

    /// Pipeline definition file, if not using the built-in one
    pub pipeline_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if no API key is configured and
    /// `ConfigError::InvalidValue` for unparsable numeric settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_keys = match std::env::var("GEMINI_API_KEYS") {
            Ok(raw) => split_list(&raw),
            Err(_) => std::env::var("GEMINI_API_KEY")
                .map(|k| split_list(&k))
                .map_err(|_| ConfigError::MissingEnvVar("GEMINI_API_KEYS".to_string()))?,
        };
        if api_keys.is_empty() {
            return Err(ConfigError::EmptyPool("credential"));
        }

        let models = split_list(
            &std::env::var("SURGE_MODELS").unwrap_or_else(|_| DEFAULT_MODELS.to_string()),
        );

        let model_selection = std::env::var("MODEL_SELECTION")
            .map(|v| {
                ModelSelection::from_str(&v)
                    .map_err(|e| ConfigError::InvalidValue("MODEL_SELECTION".to_string(), e))
            })
            .unwrap_or(Ok(ModelSelection::Random))?;

        let max_attempts: u32 = parse_env("MAX_ATTEMPTS", 3)?;
        let base = Duration::from_millis(parse_env("BACKOFF_BASE_MS", 2000)?);
        let max = Duration::from_millis(parse_env("BACKOFF_MAX_MS", 60_000)?);
        let backoff = match std::env::var("BACKOFF")
            .unwrap_or_else(|_| "exponential".to_string())
            .to_lowercase()
            .as_str()
        {
            "exponential" => Backoff::Exponential { base, max },
            "fixed" => Backoff::Fixed(base),
            "none" => Backoff::None,
            other => {
                return Err(ConfigError::InvalidValue(
                    "BACKOFF".to_string(),
                    other.to_string(),
                ))
            }
        };
        let attempt_timeout = Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 60)?);

        let generation = GenerationOptions {
            temperature: Some(parse_env("TEMPERATURE", 0.4)?),
            max_output_tokens: Some(parse_env("MAX_OUTPUT_TOKENS", 2048)?),
        };

        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let results_dir = std::env::var("RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| output_dir.join("results"));

        Ok(Self {
            api_keys,
            models,
            model_selection,
            retry: RetryPolicy {
                max_attempts,
                backoff,
                attempt_timeout,
            },
            generation,
            base_url: std::env::var("GEMINI_BASE_URL").ok(),
            output_dir,
            results_dir,
            pipeline_path: std::env::var("PIPELINE_CONFIG").ok().map(PathBuf::from),
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_keys: Vec<String>, models: Vec<String>, output_dir: PathBuf) -> Self {
        Self {
            api_keys,
            models,
            model_selection: ModelSelection::Random,
            retry: RetryPolicy::default(),
            generation: GenerationOptions::default(),
            base_url: None,
            results_dir: output_dir.join("results"),
            output_dir,
            pipeline_path: None,
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
