//! Task definitions and prompt assembly.
//!
//! # Invariants
//! - `id` is unique within a pipeline
//! - `predecessors` never contains `id` itself
//! - An `Analysis` task runs only when every predecessor completed; a
//!   `Synthesis` task runs with whatever is available and says what is not

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::output::TaskOutput;
use super::template;
use crate::agents::Agent;

/// How a task reacts to unavailable predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Requires every predecessor to have completed.
    #[default]
    Analysis,
    /// Fan-in: runs over the predecessors that completed.
    Synthesis,
}

/// One unit of work in the pipeline, owned by one agent.
#[derive(Debug, Clone)]
pub struct Task {
    id: String,
    kind: TaskKind,
    agent: Arc<Agent>,
    template: String,
    expected_output: Option<String>,
    predecessors: Vec<String>,
    artifact_path: PathBuf,
}

/// A task prompt with predecessor context filled in.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub text: String,
    /// Predecessors whose output could not be used, with the reason.
    pub unavailable: Vec<(String, String)>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        agent: Arc<Agent>,
        template: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Analysis,
            agent,
            template: template.into(),
            expected_output: None,
            predecessors: Vec::new(),
            artifact_path: artifact_path.into(),
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_predecessors<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predecessors = predecessors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn predecessors(&self) -> &[String] {
        &self.predecessors
    }

    pub fn artifact_path(&self) -> &PathBuf {
        &self.artifact_path
    }

    /// Assemble the task prompt from run inputs and predecessor outputs.
    ///
    /// Predecessors named by a `{predecessor_id}` placeholder are
    /// substituted inline; the rest are appended as a context section.
    /// Unavailable predecessors become an explicit `[UNAVAILABLE: ...]`
    /// marker and are listed in their own section.
    pub fn render_prompt(
        &self,
        inputs: &BTreeMap<String, String>,
        predecessor_outputs: &[(&str, &TaskOutput)],
    ) -> RenderedPrompt {
        let mut vars = inputs.clone();
        let mut unavailable = Vec::new();
        let mut context = Vec::new();

        for (id, output) in predecessor_outputs {
            let value = if output.is_success() {
                output.text.clone()
            } else {
                let reason = output.status.describe();
                let marker = format!("[UNAVAILABLE: upstream analysis '{}' {}]", id, reason);
                unavailable.push((id.to_string(), reason));
                marker
            };
            context.push((id.to_string(), value.clone()));
            vars.insert(id.to_string(), value);
        }

        let inline: HashSet<String> = template::placeholders(&self.template)
            .into_iter()
            .collect();
        let mut text = template::render(&self.template, &vars);

        let appended: Vec<&(String, String)> =
            context.iter().filter(|(id, _)| !inline.contains(id)).collect();
        if !appended.is_empty() {
            text.push_str("\n\n## Context from prior analyses\n");
            for (id, value) in appended {
                text.push_str(&format!("\n### {}\n{}\n", id, value));
            }
        }

        if !unavailable.is_empty() {
            text.push_str(
                "\n\n## Unavailable upstream analyses\n\
                 The following inputs could not be produced. State explicitly in your \
                 report that they are unavailable:\n",
            );
            for (id, reason) in &unavailable {
                text.push_str(&format!("- {}: {}\n", id, reason));
            }
        }

        if let Some(expected) = &self.expected_output {
            text.push_str(&format!("\n\nExpected output:\n{}", expected.trim()));
        }

        RenderedPrompt { text, unavailable }
    }
}
