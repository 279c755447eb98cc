//! Pipeline definitions.
//!
//! A pipeline is a set of agent personas and an ordered task list, loaded
//! from YAML. The built-in hospital preparedness pipeline is compiled in
//! and used when no `PIPELINE_CONFIG` is given.

mod inputs;

pub use inputs::RunInputs;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agents::{Agent, AgentRole};
use crate::config::ConfigError;
use crate::invoker::ResilientInvoker;
use crate::llm::GenerationOptions;
use crate::task::{placeholders, Task, TaskKind};

const BUILTIN_PIPELINE: &str = include_str!("../../config/pipeline.yaml");

/// Persona and per-agent overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub agent: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Predecessor task ids.
    #[serde(default)]
    pub context: Vec<String>,
    pub output_file: PathBuf,
    #[serde(default)]
    pub kind: TaskKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub agents: BTreeMap<String, AgentSpec>,
    pub tasks: Vec<TaskSpec>,
}

impl PipelineConfig {
    /// The compiled-in hospital preparedness pipeline.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(BUILTIN_PIPELINE)
    }

    /// Parse and validate a YAML pipeline.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let pipeline: Self = serde_yaml::from_str(yaml)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let pipeline = Self::from_yaml(&yaml)?;
        tracing::info!(
            path = %path.display(),
            tasks = pipeline.tasks.len(),
            "Loaded pipeline definition"
        );
        Ok(pipeline)
    }

    /// Load `path` if given, else the built-in pipeline.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    /// Check structural rules that must hold before any run starts.
    ///
    /// Tasks are executed in declared order, so every predecessor has to be
    /// declared before the task that consumes it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(invalid("pipeline declares no tasks"));
        }

        let all_ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(invalid(format!("duplicate task id '{}'", task.id)));
            }
            if !self.agents.contains_key(&task.agent) {
                return Err(invalid(format!(
                    "task '{}' references unknown agent '{}'",
                    task.id, task.agent
                )));
            }
            for pred in &task.context {
                if pred == &task.id {
                    return Err(invalid(format!("task '{}' depends on itself", task.id)));
                }
                if !all_ids.contains(pred.as_str()) {
                    return Err(invalid(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, pred
                    )));
                }
                if !seen.contains(pred.as_str()) {
                    return Err(invalid(format!(
                        "task '{}' depends on '{}', which is declared after it",
                        task.id, pred
                    )));
                }
            }
            for name in placeholders(&task.description) {
                if all_ids.contains(name.as_str()) && !task.context.contains(&name) {
                    return Err(invalid(format!(
                        "task '{}' references '{{{}}}' but does not list it as context",
                        task.id, name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.id.as_str())
    }

    /// Instantiate agents and tasks bound to `invoker`.
    ///
    /// Each agent is built once and shared by the tasks it owns.
    /// `defaults` fills any generation option an agent leaves unset.
    pub fn build(
        &self,
        invoker: Arc<ResilientInvoker>,
        defaults: &GenerationOptions,
    ) -> Result<Vec<Task>, ConfigError> {
        let mut agents: HashMap<&str, Arc<Agent>> = HashMap::with_capacity(self.agents.len());
        for (id, spec) in &self.agents {
            let options = GenerationOptions {
                temperature: spec.temperature,
                max_output_tokens: spec.max_tokens,
            }
            .or(defaults);
            let mut agent = Agent::new(
                id.clone(),
                AgentRole {
                    role: spec.role.clone(),
                    goal: spec.goal.clone(),
                    backstory: spec.backstory.clone(),
                },
                invoker.clone(),
            )
            .with_options(options);
            if let Some(max_attempts) = spec.max_attempts {
                agent = agent.with_max_attempts(max_attempts);
            }
            agents.insert(id.as_str(), Arc::new(agent));
        }

        self.tasks
            .iter()
            .map(|spec| {
                let agent = agents.get(spec.agent.as_str()).cloned().ok_or_else(|| {
                    invalid(format!(
                        "task '{}' references unknown agent '{}'",
                        spec.id, spec.agent
                    ))
                })?;
                let mut task = Task::new(
                    spec.id.clone(),
                    agent,
                    spec.description.clone(),
                    spec.output_file.clone(),
                )
                .with_kind(spec.kind)
                .with_predecessors(spec.context.iter().cloned());
                if let Some(expected) = &spec.expected_output {
                    task = task.with_expected_output(expected.clone());
                }
                Ok(task)
            })
            .collect()
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidPipeline(message.into())
}
