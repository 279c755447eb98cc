//! Task outputs and their terminal status.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::invoker::Invocation;

/// Terminal status of a task within a run.
///
/// # State Machine
/// ```text
/// (not run) -> Completed
///           \-> Failed     (invoker gave up)
///           \-> Skipped    (an upstream analysis was unavailable)
///           \-> Cancelled  (run cancelled before the task started)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed { reason: String },
    Skipped { reason: String },
    Cancelled,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Short human description used in prompts and report footers.
    pub fn describe(&self) -> String {
        match self {
            TaskStatus::Completed => "completed".to_string(),
            TaskStatus::Failed { reason } => format!("failed: {}", reason),
            TaskStatus::Skipped { reason } => format!("skipped: {}", reason),
            TaskStatus::Cancelled => "cancelled before it started".to_string(),
        }
    }
}

/// The single, final output of one task in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(flatten)]
    pub status: TaskStatus,
    /// Final text; empty unless the task completed.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_index: Option<usize>,
    /// Backend attempts spent (0 when never invoked).
    #[serde(default)]
    pub attempts: u32,
}

impl TaskOutput {
    pub fn completed(text: String, invocation: &Invocation, artifact_path: PathBuf) -> Self {
        Self {
            status: TaskStatus::Completed,
            text,
            artifact_path: Some(artifact_path),
            model: Some(invocation.model.clone()),
            credential_index: Some(invocation.credential_index),
            attempts: invocation.attempts,
        }
    }

    pub fn failed(reason: impl Into<String>, attempts: u32) -> Self {
        Self::terminal(
            TaskStatus::Failed {
                reason: reason.into(),
            },
            attempts,
        )
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::terminal(
            TaskStatus::Skipped {
                reason: reason.into(),
            },
            0,
        )
    }

    pub fn cancelled() -> Self {
        Self::terminal(TaskStatus::Cancelled, 0)
    }

    fn terminal(status: TaskStatus, attempts: u32) -> Self {
        Self {
            status,
            text: String::new(),
            artifact_path: None,
            model: None,
            credential_index: None,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_outputs_carry_no_text() {
        for output in [
            TaskOutput::failed("boom", 3),
            TaskOutput::skipped("upstream"),
            TaskOutput::cancelled(),
        ] {
            assert!(!output.is_success());
            assert!(output.text.is_empty());
            assert!(output.artifact_path.is_none());
        }
    }

    #[test]
    fn status_serializes_flat() {
        let output = TaskOutput::failed("rate limited", 3);
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "rate limited");
        assert_eq!(json["attempts"], 3);

        let back: TaskOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn describe_mentions_reason() {
        assert_eq!(
            TaskStatus::Skipped {
                reason: "festival_event_analysis unavailable".to_string()
            }
            .describe(),
            "skipped: festival_event_analysis unavailable"
        );
    }
}
