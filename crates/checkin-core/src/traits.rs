//! Collaborator interfaces used by the scheduler.
//!
//! The scheduler never owns the schema or the transport; it only needs scoped
//! store sessions and somewhere to report run outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Log, Task, TaskResult};

/// Persistent task/log store. Hands out independent sessions.
pub trait TaskStore: Send + Sync {
    /// Open a session. It is released when dropped.
    fn session(&self) -> Result<Box<dyn StoreSession>>;
}

/// A scoped unit of access to the store. Never shared between runs.
pub trait StoreSession: Send {
    fn get_task(&mut self, id: &str) -> Result<Option<Task>>;

    /// All tasks. Rows that cannot be decoded are skipped.
    fn list_tasks(&mut self) -> Result<Vec<Task>>;

    fn insert_task(&mut self, task: &Task) -> Result<()>;

    /// Replace a task definition. Errors with `NotFound` if absent.
    fn update_task(&mut self, task: &Task) -> Result<()>;

    /// Returns whether a task was removed. Its logs go with it.
    fn delete_task(&mut self, id: &str) -> Result<bool>;

    /// Update only the last-run columns of a task. A missing task is not an error.
    fn record_run(&mut self, task_id: &str, at: DateTime<Utc>, result: TaskResult) -> Result<()>;

    fn get_log(&mut self, id: &str) -> Result<Option<Log>>;

    fn insert_log(&mut self, log: &Log) -> Result<()>;

    fn update_log(&mut self, log: &Log) -> Result<()>;

    /// Newest first, optionally restricted to one task.
    fn list_logs(&mut self, task_id: Option<&str>, limit: usize) -> Result<Vec<Log>>;
}

/// Receives the outcome of every run whose task was loaded.
///
/// Implementations swallow their own failures.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn notify(&self, task: &Task, success: bool, output: &str);
}
