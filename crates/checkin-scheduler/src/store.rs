//! In-process task store for embedding and tests.
//! Same contract as the SQLite store, nothing touches disk.

use std::sync::{Arc, Mutex, MutexGuard};

use checkin_core::error::{CheckinError, Result};
use checkin_core::traits::{StoreSession, TaskStore};
use checkin_core::types::{Log, Task, TaskResult};
use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
struct MemoryData {
    tasks: Vec<Task>,
    logs: Vec<Log>,
}

/// Memory-backed store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `tasks`.
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let store = Self::new();
        if let Ok(mut data) = store.data.lock() {
            data.tasks.extend(tasks);
        }
        store
    }
}

impl TaskStore for MemoryStore {
    fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(MemorySession {
            data: Arc::clone(&self.data),
        }))
    }
}

struct MemorySession {
    data: Arc<Mutex<MemoryData>>,
}

impl MemorySession {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryData>> {
        self.data
            .lock()
            .map_err(|e| CheckinError::Store(format!("Lock: {e}")))
    }
}

impl StoreSession for MemorySession {
    fn get_task(&mut self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock()?.tasks.iter().find(|t| t.id == id).cloned())
    }

    fn list_tasks(&mut self) -> Result<Vec<Task>> {
        Ok(self.lock()?.tasks.clone())
    }

    fn insert_task(&mut self, task: &Task) -> Result<()> {
        let mut data = self.lock()?;
        if data.tasks.iter().any(|t| t.id == task.id) {
            return Err(CheckinError::Store(format!("Insert task: duplicate id {}", task.id)));
        }
        data.tasks.push(task.clone());
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> Result<()> {
        let mut data = self.lock()?;
        let slot = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| CheckinError::NotFound(format!("task {}", task.id)))?;
        *slot = task.clone();
        Ok(())
    }

    fn delete_task(&mut self, id: &str) -> Result<bool> {
        let mut data = self.lock()?;
        let before = data.tasks.len();
        data.tasks.retain(|t| t.id != id);
        data.logs.retain(|l| l.task_id != id);
        Ok(data.tasks.len() < before)
    }

    fn record_run(&mut self, task_id: &str, at: DateTime<Utc>, result: TaskResult) -> Result<()> {
        let mut data = self.lock()?;
        if let Some(task) = data.tasks.iter_mut().find(|t| t.id == task_id) {
            task.last_run = Some(at);
            task.last_result = Some(result);
        }
        Ok(())
    }

    fn get_log(&mut self, id: &str) -> Result<Option<Log>> {
        Ok(self.lock()?.logs.iter().find(|l| l.id == id).cloned())
    }

    fn insert_log(&mut self, log: &Log) -> Result<()> {
        let mut data = self.lock()?;
        if !data.tasks.iter().any(|t| t.id == log.task_id) {
            return Err(CheckinError::Store(format!("Insert log: unknown task {}", log.task_id)));
        }
        data.logs.push(log.clone());
        Ok(())
    }

    fn update_log(&mut self, log: &Log) -> Result<()> {
        let mut data = self.lock()?;
        let slot = data
            .logs
            .iter_mut()
            .find(|l| l.id == log.id)
            .ok_or_else(|| CheckinError::NotFound(format!("log {}", log.id)))?;
        slot.status = log.status;
        slot.output = log.output.clone();
        Ok(())
    }

    fn list_logs(&mut self, task_id: Option<&str>, limit: usize) -> Result<Vec<Log>> {
        let data = self.lock()?;
        let mut logs: Vec<Log> = data
            .logs
            .iter()
            .rev()
            .filter(|l| task_id.is_none_or(|id| l.task_id == id))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs.truncate(limit);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkin_core::types::TaskMode;

    #[test]
    fn sessions_share_data() {
        let store = MemoryStore::new();
        let task = Task::new("t", TaskMode::Cookie, "* * * * *");
        store.session().unwrap().insert_task(&task).unwrap();
        assert!(store.session().unwrap().get_task(&task.id).unwrap().is_some());
        assert!(store.clone().session().unwrap().insert_task(&task).is_err());
    }

    #[test]
    fn logs_follow_their_task() {
        let task = Task::new("t", TaskMode::Cookie, "* * * * *");
        let store = MemoryStore::with_tasks([task.clone()]);
        let mut session = store.session().unwrap();

        let mut log = Log::started(&task.id);
        session.insert_log(&log).unwrap();
        log.output = "done".into();
        session.update_log(&log).unwrap();
        assert_eq!(session.list_logs(Some(&task.id), 5).unwrap()[0].output, "done");

        assert!(session.insert_log(&Log::started("ghost")).is_err());
        session.delete_task(&task.id).unwrap();
        assert!(session.list_logs(None, 5).unwrap().is_empty());
    }
}
