//! Model identifier pool.
//!
//! Random selection is the default: repeats are allowed, which spreads
//! attempts and runs across models without promising coverage.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::sync::Mutex;

use crate::config::ConfigError;

/// How `ModelPool::pick` chooses the next model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelSelection {
    /// Uniform-random, independent per call.
    #[default]
    Random,
    /// Cycle through the configured order.
    RoundRobin,
}

impl FromStr for ModelSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown model selection '{}'", other)),
        }
    }
}

struct Selector {
    rng: Box<dyn RngCore + Send>,
    cursor: usize,
}

/// Pool of backend model identifiers.
pub struct ModelPool {
    models: Vec<String>,
    selection: ModelSelection,
    selector: Mutex<Selector>,
}

impl ModelPool {
    /// Random-selection pool seeded from OS entropy.
    ///
    /// # Errors
    /// Returns `ConfigError::EmptyPool` if `models` is empty.
    pub fn new(models: Vec<String>) -> Result<Self, ConfigError> {
        Self::with_rng(models, ModelSelection::Random, StdRng::from_entropy())
    }

    /// Pool with an explicit strategy, seeded from OS entropy.
    pub fn with_selection(
        models: Vec<String>,
        selection: ModelSelection,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(models, selection, StdRng::from_entropy())
    }

    /// Pool with an explicit strategy and random source.
    pub fn with_rng<R>(
        models: Vec<String>,
        selection: ModelSelection,
        rng: R,
    ) -> Result<Self, ConfigError>
    where
        R: RngCore + Send + 'static,
    {
        if models.is_empty() {
            return Err(ConfigError::EmptyPool("model"));
        }
        Ok(Self {
            models,
            selection,
            selector: Mutex::new(Selector {
                rng: Box::new(rng),
                cursor: 0,
            }),
        })
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn selection(&self) -> ModelSelection {
        self.selection
    }

    /// Choose a model for the next attempt.
    pub async fn pick(&self) -> String {
        let mut selector = self.selector.lock().await;
        let index = match self.selection {
            ModelSelection::Random => selector.rng.gen_range(0..self.models.len()),
            ModelSelection::RoundRobin => {
                let index = selector.cursor;
                selector.cursor = (selector.cursor + 1) % self.models.len();
                index
            }
        };
        self.models[index].clone()
    }
}
