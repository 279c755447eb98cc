//! Task graph runner.
//!
//! Executes a statically ordered task list on a single cooperative flow:
//! 1. Gather predecessor outputs (missing ones abort the run)
//! 2. Skip analysis tasks whose inputs are unavailable
//! 3. Render the prompt and invoke the owning agent
//! 4. Record the output and hand completed text to the artifact sink
//!
//! Failures are contained per task. Cancellation is checked before each
//! task starts; an in-flight backend call is never interrupted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sink::ArtifactSink;
use crate::task::{Task, TaskKind, TaskOutput, TaskStatus};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("task '{task}' depends on '{predecessor}', which has not produced an output")]
    MissingPredecessorOutput { task: String, predecessor: String },

    #[error("start task '{0}' is not part of the pipeline")]
    UnknownStartTask(String),
}

/// All task outputs of one run, in declared order.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    order: Vec<String>,
    outputs: HashMap<String, TaskOutput>,
}

impl RunOutcome {
    pub fn get(&self, task_id: &str) -> Option<&TaskOutput> {
        self.outputs.get(task_id)
    }

    /// Outputs in declared task order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskOutput)> {
        self.order
            .iter()
            .filter_map(|id| self.outputs.get(id).map(|o| (id.as_str(), o)))
    }

    pub fn outputs(&self) -> &HashMap<String, TaskOutput> {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outputs.values().all(TaskOutput::is_success)
    }

    /// Ids of tasks that did not complete, in declared order.
    pub fn unsuccessful(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Runs a task sequence end-to-end.
pub struct TaskGraphRunner {
    sink: Arc<dyn ArtifactSink>,
    inputs: BTreeMap<String, String>,
    cancel: CancellationToken,
}

impl TaskGraphRunner {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            sink,
            inputs: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Values for non-task placeholders such as `{hospital_name}`.
    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run before its next task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every task in declared order.
    pub async fn run(&self, tasks: &[Task]) -> Result<RunOutcome, RunError> {
        self.run_from(tasks, HashMap::new(), None).await
    }

    /// Execute from `start_task` onward, taking earlier outputs from `seeded`.
    ///
    /// Tasks before `start_task` that have no seeded output are left out of
    /// the outcome; a later task depending on one of them fails the run with
    /// `MissingPredecessorOutput`.
    pub async fn run_from(
        &self,
        tasks: &[Task],
        mut seeded: HashMap<String, TaskOutput>,
        start_task: Option<&str>,
    ) -> Result<RunOutcome, RunError> {
        let start_index = match start_task {
            Some(id) => tasks
                .iter()
                .position(|t| t.id() == id)
                .ok_or_else(|| RunError::UnknownStartTask(id.to_string()))?,
            None => 0,
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut order = Vec::with_capacity(tasks.len());
        let mut outputs: HashMap<String, TaskOutput> = HashMap::with_capacity(tasks.len());

        tracing::info!(
            run_id = %run_id,
            tasks = tasks.len(),
            start = start_task.unwrap_or("(beginning)"),
            "Starting run"
        );

        for (index, task) in tasks.iter().enumerate() {
            if index < start_index {
                if let Some(output) = seeded.remove(task.id()) {
                    order.push(task.id().to_string());
                    outputs.insert(task.id().to_string(), output);
                }
                continue;
            }

            let output = if self.cancel.is_cancelled() {
                tracing::info!(task = %task.id(), "Run cancelled, not starting task");
                TaskOutput::cancelled()
            } else {
                self.execute_task(task, &outputs).await?
            };

            order.push(task.id().to_string());
            outputs.insert(task.id().to_string(), output);
        }

        let outcome = RunOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            order,
            outputs,
        };
        tracing::info!(
            run_id = %run_id,
            completed = outcome.len() - outcome.unsuccessful().len(),
            unsuccessful = outcome.unsuccessful().len(),
            "Run finished"
        );
        Ok(outcome)
    }

    async fn execute_task(
        &self,
        task: &Task,
        outputs: &HashMap<String, TaskOutput>,
    ) -> Result<TaskOutput, RunError> {
        let mut predecessors = Vec::with_capacity(task.predecessors().len());
        for id in task.predecessors() {
            let output = outputs
                .get(id)
                .ok_or_else(|| RunError::MissingPredecessorOutput {
                    task: task.id().to_string(),
                    predecessor: id.clone(),
                })?;
            predecessors.push((id.as_str(), output));
        }

        let unavailable: Vec<&str> = predecessors
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(id, _)| *id)
            .collect();

        // Synthesis always runs so its report can name what is missing.
        if task.kind() == TaskKind::Analysis && !unavailable.is_empty() {
            let reason = format!("upstream analysis unavailable: {}", unavailable.join(", "));
            tracing::warn!(task = %task.id(), "Skipping task: {}", reason);
            return Ok(TaskOutput::skipped(reason));
        }

        let rendered = task.render_prompt(&self.inputs, &predecessors);
        tracing::info!(
            task = %task.id(),
            agent = %task.agent().id(),
            prompt_chars = rendered.text.len(),
            "Starting task"
        );

        let invocation = match task.agent().execute(&rendered.text).await {
            Ok(invocation) => invocation,
            Err(error) => {
                tracing::error!(task = %task.id(), "Task failed: {}", error);
                return Ok(TaskOutput::failed(error.to_string(), error.attempts()));
            }
        };

        let mut text = invocation.text.clone();
        if !rendered.unavailable.is_empty() {
            text.push_str(&unavailable_footer(&rendered.unavailable));
        }

        if let Err(error) = self.sink.write(task.artifact_path(), &text).await {
            tracing::error!(
                task = %task.id(),
                path = %task.artifact_path().display(),
                "Failed to persist artifact: {}",
                error
            );
        }

        tracing::info!(
            task = %task.id(),
            model = %invocation.model,
            attempts = invocation.attempts,
            "Task completed"
        );
        Ok(TaskOutput::completed(
            text,
            &invocation,
            task.artifact_path().clone(),
        ))
    }
}

/// Deterministic note appended to synthesis output listing missing inputs.
fn unavailable_footer(unavailable: &[(String, String)]) -> String {
    let mut footer = String::from("\n\n---\n**Unavailable upstream analyses**\n\n");
    for (id, reason) in unavailable {
        footer.push_str(&format!("- `{}`: {}\n", id, reason));
    }
    footer
}

/// Status of every task, for comparing runs.
pub fn status_map(outcome: &RunOutcome) -> BTreeMap<String, TaskStatus> {
    outcome
        .iter()
        .map(|(id, o)| (id.to_string(), o.status.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentRole};
    use crate::invoker::{Backoff, ResilientInvoker, RetryPolicy};
    use crate::llm::BackendError;
    use crate::pool::{CredentialPool, ModelPool};
    use crate::sink::{MemorySink, SinkError};
    use crate::testing::StubBackend;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn agent(backend: Arc<StubBackend>) -> Arc<Agent> {
        let invoker = ResilientInvoker::new(
            backend,
            Arc::new(CredentialPool::new(["k0", "k1"]).unwrap()),
            Arc::new(ModelPool::new(vec!["flash".to_string()]).unwrap()),
            RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::None,
                attempt_timeout: Duration::from_secs(5),
            },
        );
        Arc::new(Agent::new(
            "analyst",
            AgentRole {
                role: "Analyst".to_string(),
                goal: "Analyse".to_string(),
                backstory: "Test persona".to_string(),
            },
            Arc::new(invoker),
        ))
    }

    /// Fails every call whose prompt contains `TASK_A`.
    fn failing_a() -> Arc<StubBackend> {
        StubBackend::new(|prompt, call| {
            if prompt.contains("TASK_A") {
                Err(BackendError::rate_limited("quota exhausted", None))
            } else {
                Ok(format!("findings<{}>", call))
            }
        })
    }

    fn chain(agent: Arc<Agent>) -> Vec<Task> {
        vec![
            Task::new("a", agent.clone(), "TASK_A forecast", "a.md"),
            Task::new("b", agent.clone(), "TASK_B using {a}", "b.md").with_predecessors(["a"]),
            Task::new("c", agent, "TASK_C using {b}", "c.md").with_predecessors(["b"]),
        ]
    }

    fn fan_in(agent: Arc<Agent>) -> Vec<Task> {
        vec![
            Task::new("a", agent.clone(), "TASK_A festival", "a.md"),
            Task::new("b", agent.clone(), "TASK_B pollution", "b.md"),
            Task::new("d", agent, "TASK_D combine {a} with {b}", "d.md")
                .with_kind(TaskKind::Synthesis)
                .with_predecessors(["a", "b"]),
        ]
    }

    #[tokio::test]
    async fn failed_head_of_chain_skips_dependents_without_invoking() {
        let backend = failing_a();
        let sink = Arc::new(MemorySink::new());
        let outcome = TaskGraphRunner::new(sink.clone())
            .run(&chain(agent(backend.clone())))
            .await
            .unwrap();

        assert!(matches!(outcome.get("a").unwrap().status, TaskStatus::Failed { .. }));
        assert!(matches!(outcome.get("b").unwrap().status, TaskStatus::Skipped { .. }));
        assert!(matches!(outcome.get("c").unwrap().status, TaskStatus::Skipped { .. }));
        assert_eq!(outcome.unsuccessful(), vec!["a", "b", "c"]);

        // Only A's two attempts reached the backend.
        assert_eq!(backend.call_count(), 2);
        assert!(backend.prompts_containing("TASK_B").is_empty());
        assert!(backend.prompts_containing("TASK_C").is_empty());
        assert!(sink.paths().await.is_empty());
        assert_eq!(outcome.get("a").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn fan_in_runs_with_available_inputs_and_marks_missing() {
        let backend = failing_a();
        let sink = Arc::new(MemorySink::new());
        let outcome = TaskGraphRunner::new(sink.clone())
            .run(&fan_in(agent(backend.clone())))
            .await
            .unwrap();

        let b_text = outcome.get("b").unwrap().text.clone();
        assert!(outcome.get("b").unwrap().is_success());
        let d = outcome.get("d").unwrap();
        assert!(d.is_success());

        let d_prompts = backend.prompts_containing("TASK_D");
        assert_eq!(d_prompts.len(), 1);
        assert!(d_prompts[0].contains(&b_text));
        assert!(d_prompts[0].contains("[UNAVAILABLE: upstream analysis 'a' failed"));

        assert!(d.text.contains("**Unavailable upstream analyses**"));
        assert!(d.text.contains("- `a`: failed:"));
        assert_eq!(sink.get("d.md").await.as_deref(), Some(d.text.as_str()));
    }

    #[tokio::test]
    async fn synthesis_with_no_available_inputs_still_reports_them() {
        let backend = StubBackend::new(|prompt, _| {
            if prompt.contains("TASK_D") {
                Ok("report".to_string())
            } else {
                Err(BackendError::server_error(503, "unavailable"))
            }
        });
        let sink = Arc::new(MemorySink::new());
        let outcome = TaskGraphRunner::new(sink.clone())
            .run(&fan_in(agent(backend.clone())))
            .await
            .unwrap();

        assert!(matches!(outcome.get("a").unwrap().status, TaskStatus::Failed { .. }));
        assert!(matches!(outcome.get("b").unwrap().status, TaskStatus::Failed { .. }));

        let d = outcome.get("d").unwrap();
        assert_eq!(d.status, TaskStatus::Completed);
        assert!(d.text.starts_with("report"));
        assert!(d.text.contains("- `a`: failed:"));
        assert!(d.text.contains("- `b`: failed:"));
        assert_eq!(d.artifact_path, Some(PathBuf::from("d.md")));
        assert_eq!(sink.get("d.md").await.as_deref(), Some(d.text.as_str()));

        let d_prompts = backend.prompts_containing("TASK_D");
        assert_eq!(d_prompts.len(), 1);
        assert!(d_prompts[0].contains("[UNAVAILABLE: upstream analysis 'a' failed"));
        assert!(d_prompts[0].contains("[UNAVAILABLE: upstream analysis 'b' failed"));
        // Two attempts each for a and b, then the report.
        assert_eq!(backend.call_count(), 5);
    }

    #[tokio::test]
    async fn missing_predecessor_aborts_run() {
        let backend = StubBackend::always_ok();
        let agent = agent(backend.clone());
        let tasks = vec![
            Task::new("a", agent.clone(), "TASK_A", "a.md"),
            Task::new("b", agent, "TASK_B {ghost}", "b.md").with_predecessors(["ghost"]),
        ];
        let err = TaskGraphRunner::new(Arc::new(MemorySink::new()))
            .run(&tasks)
            .await
            .unwrap_err();

        match err {
            RunError::MissingPredecessorOutput { task, predecessor } => {
                assert_eq!(task, "b");
                assert_eq!(predecessor, "ghost");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn repeated_runs_have_identical_structure() {
        let backend = StubBackend::always_ok();
        let runner = TaskGraphRunner::new(Arc::new(MemorySink::new()));
        let tasks = fan_in(agent(backend));

        let first = runner.run(&tasks).await.unwrap();
        let second = runner.run(&tasks).await.unwrap();

        assert_eq!(status_map(&first), status_map(&second));
        assert!(first.all_succeeded());
        assert!(second.iter().all(|(_, o)| !o.text.is_empty()));
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn cancellation_between_tasks_marks_remaining_cancelled() {
        struct CancellingSink(CancellationToken);

        #[async_trait::async_trait]
        impl ArtifactSink for CancellingSink {
            async fn write(&self, _path: &Path, _text: &str) -> Result<(), SinkError> {
                self.0.cancel();
                Ok(())
            }
        }

        let backend = StubBackend::always_ok();
        let token = CancellationToken::new();
        let runner = TaskGraphRunner::new(Arc::new(CancellingSink(token.clone())))
            .with_cancellation(token);
        let outcome = runner.run(&chain(agent(backend.clone()))).await.unwrap();

        assert!(outcome.get("a").unwrap().is_success());
        assert_eq!(outcome.get("b").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(outcome.get("c").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_task() {
        struct BrokenSink;

        #[async_trait::async_trait]
        impl ArtifactSink for BrokenSink {
            async fn write(&self, path: &Path, _text: &str) -> Result<(), SinkError> {
                Err(SinkError::InvalidPath(path.to_path_buf()))
            }
        }

        let outcome = TaskGraphRunner::new(Arc::new(BrokenSink))
            .run(&chain(agent(StubBackend::always_ok())))
            .await
            .unwrap();
        assert!(outcome.all_succeeded());
    }

    #[tokio::test]
    async fn run_from_reuses_seeded_outputs() {
        let backend = StubBackend::always_ok();
        let tasks = chain(agent(backend.clone()));
        let runner = TaskGraphRunner::new(Arc::new(MemorySink::new()));
        let first = runner.run(&tasks).await.unwrap();
        let seeded: HashMap<String, TaskOutput> = first.outputs().clone();
        let a_text = first.get("a").unwrap().text.clone();

        let replay = runner.run_from(&tasks, seeded, Some("b")).await.unwrap();

        assert_eq!(backend.call_count(), 5);
        assert_eq!(replay.get("a").unwrap().text, a_text);
        let b_prompts = backend.prompts_containing("TASK_B");
        assert_eq!(b_prompts.len(), 2);
        assert!(b_prompts[1].contains(&a_text));
        assert!(replay.all_succeeded());
    }

    #[tokio::test]
    async fn run_from_rejects_unknown_start() {
        let runner = TaskGraphRunner::new(Arc::new(MemorySink::new()));
        let tasks = chain(agent(StubBackend::always_ok()));
        let err = runner
            .run_from(&tasks, HashMap::new(), Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::UnknownStartTask(id) if id == "nope"));
    }

    #[tokio::test]
    async fn inputs_fill_template_placeholders() {
        let backend = StubBackend::always_ok();
        let tasks = vec![Task::new(
            "a",
            agent(backend.clone()),
            "TASK_A for {hospital_name}",
            "a.md",
        )];
        let inputs: BTreeMap<String, String> =
            [("hospital_name".to_string(), "AIIMS".to_string())].into();
        TaskGraphRunner::new(Arc::new(MemorySink::new()))
            .with_inputs(inputs)
            .run(&tasks)
            .await
            .unwrap();
        assert_eq!(backend.prompts_containing("TASK_A for AIIMS").len(), 1);
    }
}
