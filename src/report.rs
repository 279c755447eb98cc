//! Run records: the JSON summary of one run, used for audit and replay.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::RunInputs;
use crate::runner::RunOutcome;
use crate::sink::write_atomic;
use crate::task::TaskOutput;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to access run record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed run record: {0}")]
    Json(#[from] serde_json::Error),
}

/// One task's entry in a run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(flatten)]
    pub output: TaskOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inputs: BTreeMap<String, String>,
    /// Tasks in execution order.
    pub tasks: Vec<TaskRecord>,
}

impl RunRecord {
    pub fn from_outcome(outcome: &RunOutcome, inputs: &BTreeMap<String, String>) -> Self {
        Self {
            run_id: outcome.run_id,
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            inputs: inputs.clone(),
            tasks: outcome
                .iter()
                .map(|(id, output)| TaskRecord {
                    id: id.to_string(),
                    output: output.clone(),
                })
                .collect(),
        }
    }

    /// File name used when saving into a results directory.
    ///
    /// The run id suffix keeps runs started within the same second apart.
    pub fn file_name(&self) -> String {
        let id = self.run_id.simple().to_string();
        format!(
            "surge_run_{}_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S"),
            &id[..8]
        )
    }

    /// Inputs the recorded run was rendered with, for replaying it.
    pub fn run_inputs(&self) -> RunInputs {
        RunInputs::from(self.inputs.clone())
    }

    /// Write the record into `dir` and return its path.
    ///
    /// The file is written to a temporary sibling first and renamed into
    /// place.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let path = dir.join(self.file_name());
        let io_err = |source| ReportError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&path, json.as_bytes()).await.map_err(io_err)?;

        tracing::info!(path = %path.display(), run_id = %self.run_id, "Run record saved");
        Ok(path)
    }

    pub async fn load(path: &Path) -> Result<Self, ReportError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ReportError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Outputs to seed a replay with.
    pub fn outputs(&self) -> HashMap<String, TaskOutput> {
        self.tasks
            .iter()
            .map(|t| (t.id.clone(), t.output.clone()))
            .collect()
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskOutput> {
        self.tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| &t.output)
    }
}
