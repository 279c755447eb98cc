//! Task module - task definitions, outputs, and prompt templating.
//!
//! The dependency structure is static: each task lists its predecessors and
//! the pipeline declares tasks in an order that already satisfies them.

pub mod task;
mod output;
mod template;

pub use output::{TaskOutput, TaskStatus};
pub use task::{RenderedPrompt, Task, TaskKind};
pub use template::{placeholders, render};
