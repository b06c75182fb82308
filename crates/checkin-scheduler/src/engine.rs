//! Execution engine: one task run end to end.
//!
//! load task → placeholder log → flow → result filter → persist → notify
//!
//! Used the same way by scheduled firings and manual runs. A run is a closed
//! failure domain: nothing inside it reaches the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use checkin_core::config::CheckinConfig;
use checkin_core::error::Result;
use checkin_core::traits::{RunNotifier, StoreSession, TaskStore};
use checkin_core::types::{Log, Task, TaskResult};
use futures::FutureExt;

use crate::flow::{FlowExecutor, FlowOutcome};
use crate::notify::WebhookNotifier;
use crate::postprocess::{annotate_error, apply_result_regex};

/// Output reported when a run dies before the flow starts.
const NOT_STARTED: &str = "Internal error (execution did not start)";

/// Final state of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub task_id: String,
    pub log_id: String,
    pub success: bool,
    pub output: String,
}

pub struct ExecutionEngine {
    store: Arc<dyn TaskStore>,
    flow: FlowExecutor,
    notifier: Option<Arc<dyn RunNotifier>>,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn TaskStore>, flow: FlowExecutor) -> Self {
        Self {
            store,
            flow,
            notifier: None,
        }
    }

    /// Engine wired from config: HTTP settings, plus the hub notifier if configured.
    pub fn from_config(store: Arc<dyn TaskStore>, config: &CheckinConfig) -> Self {
        let engine = Self::new(store, FlowExecutor::new(&config.http));
        match WebhookNotifier::from_config(&config.notify) {
            Some(notifier) => engine.with_notifier(Arc::new(notifier)),
            None => engine,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Run a task once. Never fails; returns `None` if the task does not
    /// exist or the run could not be recorded.
    ///
    /// Safe to call concurrently, even for the same task: each call writes
    /// its own log and the last finisher sets the task's last result.
    pub async fn execute_task(&self, task_id: &str) -> Option<RunReport> {
        let mut session = match self.store.session() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("💥 Cannot open store session for task {task_id}: {e}");
                return None;
            }
        };

        let task = match session.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::debug!("Task {task_id} no longer exists, nothing to run");
                return None;
            }
            Err(e) => {
                tracing::error!("💥 Cannot load task {task_id}: {e}");
                return None;
            }
        };

        tracing::info!("🔔 Running task '{}' ({})", task.name, task.id);
        let mut outcome = FlowOutcome::failed(NOT_STARTED);
        let recorded = self.run_loaded(session.as_mut(), &task, &mut outcome).await;
        drop(session);

        let report = match recorded {
            Ok(log_id) => {
                tracing::info!(
                    "{} Task '{}' finished: {}",
                    if outcome.success { "✅" } else { "❌" },
                    task.name,
                    TaskResult::from(outcome.success)
                );
                Some(RunReport {
                    task_id: task.id.clone(),
                    log_id,
                    success: outcome.success,
                    output: outcome.output.clone(),
                })
            }
            Err(e) => {
                tracing::error!("💥 Run of task '{}' could not be recorded: {e}", task.name);
                None
            }
        };

        if let Some(notifier) = &self.notifier {
            notifier.notify(&task, outcome.success, &outcome.output).await;
        }

        report
    }

    /// Steps 2-5. `outcome` holds the latest known result even on error.
    async fn run_loaded(
        &self,
        session: &mut dyn StoreSession,
        task: &Task,
        outcome: &mut FlowOutcome,
    ) -> Result<String> {
        let mut log = Log::started(&task.id);
        session.insert_log(&log)?;

        *outcome = self.run_flow(task).await;
        if outcome.success {
            filter_output(task, outcome);
        }

        session.record_run(&task.id, log.timestamp, TaskResult::from(outcome.success))?;
        log.status = outcome.success;
        log.output = outcome.output.clone();
        session.update_log(&log)?;
        Ok(log.id)
    }

    /// The flow with every error and panic turned into a failed outcome.
    async fn run_flow(&self, task: &Task) -> FlowOutcome {
        match AssertUnwindSafe(self.flow.run(task)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => FlowOutcome::failed(describe_failure(&e)),
            Err(panic) => FlowOutcome::failed(format!(
                "Error: flow executor panicked: {}",
                panic_message(panic.as_ref())
            )),
        }
    }
}

fn filter_output(task: &Task, outcome: &mut FlowOutcome) {
    match task.config.result_regex() {
        Ok(Some(pattern)) => outcome.output = apply_result_regex(&outcome.output, pattern),
        Ok(None) => {}
        Err(e) => outcome.output = annotate_error(&outcome.output, &e),
    }
}

fn describe_failure(err: &dyn std::error::Error) -> String {
    let mut text = format!("Error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    text
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use checkin_core::error::CheckinError;
    use checkin_core::types::{TaskConfig, TaskMode};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, bool, String)>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(String, bool, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunNotifier for RecordingNotifier {
        async fn notify(&self, task: &Task, success: bool, output: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((task.name.clone(), success, output.to_string()));
        }
    }

    async fn target(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn cookie_task(url: String) -> Task {
        Task::new("daily", TaskMode::Cookie, "0 8 * * *")
            .with_config(TaskConfig::new().with("signin_url", url))
    }

    fn engine(store: &MemoryStore) -> (ExecutionEngine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ExecutionEngine::new(Arc::new(store.clone()), FlowExecutor::default())
            .with_notifier(notifier.clone());
        (engine, notifier)
    }

    fn reload(store: &MemoryStore, id: &str) -> (Task, Vec<Log>) {
        let mut session = store.session().unwrap();
        (
            session.get_task(id).unwrap().unwrap(),
            session.list_logs(Some(id), 10).unwrap(),
        )
    }

    #[tokio::test]
    async fn missing_task_is_a_silent_no_op() {
        let store = MemoryStore::new();
        let (engine, notifier) = engine(&store);
        assert!(engine.execute_task("nope").await.is_none());
        assert!(notifier.sent().is_empty());
        assert!(store.session().unwrap().list_logs(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_is_recorded_and_notified() {
        let server = target(200, "OK").await;
        let task = cookie_task(server.uri());
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, notifier) = engine(&store);

        let report = engine.execute_task(&task.id).await.unwrap();
        assert!(report.success);

        let (task_row, logs) = reload(&store, &task.id);
        assert_eq!(task_row.last_result, Some(TaskResult::Success));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, report.log_id);
        assert!(logs[0].status);
        assert_eq!(logs[0].output, "Status: 200\nBody: OK");
        assert_eq!(task_row.last_run, Some(logs[0].timestamp));

        assert_eq!(
            notifier.sent(),
            vec![("daily".to_string(), true, "Status: 200\nBody: OK".to_string())]
        );
    }

    #[tokio::test]
    async fn failure_is_recorded_and_notified() {
        let server = target(500, "boom").await;
        let task = cookie_task(server.uri());
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, notifier) = engine(&store);

        let report = engine.execute_task(&task.id).await.unwrap();
        assert!(!report.success);

        let (task_row, logs) = reload(&store, &task.id);
        assert_eq!(task_row.last_result, Some(TaskResult::Failure));
        assert!(!logs[0].status);
        assert!(logs[0].output.contains("Status: 500"));
        assert!(!notifier.sent()[0].1);
    }

    #[tokio::test]
    async fn result_regex_rewrites_successful_output() {
        let server = target(200, r#"{"id":42,"status":"ok"}"#).await;
        let mut task = cookie_task(server.uri());
        task.config = task.config.with("result_regex", r#""id":(\d+),"status":"(\w+)""#);
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, notifier) = engine(&store);

        let report = engine.execute_task(&task.id).await.unwrap();
        assert_eq!(report.output, "42 | ok");
        assert_eq!(reload(&store, &task.id).1[0].output, "42 | ok");
        assert_eq!(notifier.sent()[0].2, "42 | ok");
    }

    #[tokio::test]
    async fn result_regex_is_skipped_on_failure() {
        let server = target(404, "id=1").await;
        let mut task = cookie_task(server.uri());
        task.config = task.config.with("result_regex", r"id=(\d+)");
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, _) = engine(&store);

        let report = engine.execute_task(&task.id).await.unwrap();
        assert_eq!(report.output, "Status: 404\nBody: id=1");
    }

    #[tokio::test]
    async fn bad_result_regex_keeps_success() {
        let server = target(200, "OK").await;
        let mut task = cookie_task(server.uri());
        task.config = task.config.with("result_regex", "(oops");
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, _) = engine(&store);

        let report = engine.execute_task(&task.id).await.unwrap();
        assert!(report.success);
        assert!(report.output.starts_with("Status: 200\nBody: OK\n[Regex Filter Error]"));
    }

    #[tokio::test]
    async fn config_errors_become_failed_runs() {
        let task = Task::new("broken", TaskMode::Password, "0 8 * * *");
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, notifier) = engine(&store);

        let report = engine.execute_task(&task.id).await.unwrap();
        assert!(!report.success);
        assert_eq!(
            report.output,
            "Error: invalid task configuration\n  caused by: missing required key `login_url`"
        );
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn placeholder_log_is_visible_while_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let task = cookie_task(server.uri());
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, _) = engine(&store);
        let engine = Arc::new(engine);

        let run = tokio::spawn({
            let engine = Arc::clone(&engine);
            let id = task.id.clone();
            async move { engine.execute_task(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(150)).await;

        let logs = reload(&store, &task.id).1;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].output, Log::STARTED);
        assert!(!logs[0].status);

        assert!(run.await.unwrap().unwrap().success);
        assert!(reload(&store, &task.id).1[0].status);
    }

    #[tokio::test]
    async fn concurrent_runs_of_one_task_each_log() {
        let server = target(200, "OK").await;
        let task = cookie_task(server.uri());
        let store = MemoryStore::with_tasks([task.clone()]);
        let (engine, notifier) = engine(&store);

        let (a, b) = tokio::join!(engine.execute_task(&task.id), engine.execute_task(&task.id));
        assert_ne!(a.unwrap().log_id, b.unwrap().log_id);
        assert_eq!(reload(&store, &task.id).1.len(), 2);
        assert_eq!(notifier.sent().len(), 2);
    }

    /// Store whose log writes always fail.
    struct BrokenLogStore(MemoryStore);

    struct BrokenLogSession(Box<dyn StoreSession>);

    impl TaskStore for BrokenLogStore {
        fn session(&self) -> Result<Box<dyn StoreSession>> {
            Ok(Box::new(BrokenLogSession(self.0.session()?)))
        }
    }

    impl StoreSession for BrokenLogSession {
        fn get_task(&mut self, id: &str) -> Result<Option<Task>> {
            self.0.get_task(id)
        }
        fn list_tasks(&mut self) -> Result<Vec<Task>> {
            self.0.list_tasks()
        }
        fn insert_task(&mut self, task: &Task) -> Result<()> {
            self.0.insert_task(task)
        }
        fn update_task(&mut self, task: &Task) -> Result<()> {
            self.0.update_task(task)
        }
        fn delete_task(&mut self, id: &str) -> Result<bool> {
            self.0.delete_task(id)
        }
        fn record_run(&mut self, id: &str, at: DateTime<Utc>, result: TaskResult) -> Result<()> {
            self.0.record_run(id, at, result)
        }
        fn get_log(&mut self, id: &str) -> Result<Option<Log>> {
            self.0.get_log(id)
        }
        fn insert_log(&mut self, _log: &Log) -> Result<()> {
            Err(CheckinError::Store("disk full".into()))
        }
        fn update_log(&mut self, log: &Log) -> Result<()> {
            self.0.update_log(log)
        }
        fn list_logs(&mut self, task_id: Option<&str>, limit: usize) -> Result<Vec<Log>> {
            self.0.list_logs(task_id, limit)
        }
    }

    #[tokio::test]
    async fn store_failure_after_load_still_notifies() {
        let task = cookie_task("http://127.0.0.1:1/".into());
        let store = MemoryStore::with_tasks([task.clone()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ExecutionEngine::new(
            Arc::new(BrokenLogStore(store.clone())),
            FlowExecutor::default(),
        )
            .with_notifier(notifier.clone());

        assert!(engine.execute_task(&task.id).await.is_none());
        assert_eq!(
            notifier.sent(),
            vec![("daily".to_string(), false, NOT_STARTED.to_string())]
        );
        assert!(reload(&store, &task.id).0.last_result.is_none());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("bad state");
        assert_eq!(panic_message(payload.as_ref()), "bad state");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
