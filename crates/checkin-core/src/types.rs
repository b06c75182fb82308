//! Task and log data model, plus typed views over a task's configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskConfigError;

/// Authentication strategy used by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskMode {
    /// Replay a stored cookie against the sign-in URL.
    Cookie,
    /// Log in with credentials, extract a token, then sign in with it.
    Password,
}

/// Whether the scheduler should keep a job for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Active,
    Paused,
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskResult {
    Success,
    Failure,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Cookie => "COOKIE",
            TaskMode::Password => "PASSWORD",
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "ACTIVE",
            TaskStatus::Paused => "PAUSED",
        }
    }
}

impl TaskResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResult::Success => "SUCCESS",
            TaskResult::Failure => "FAILURE",
        }
    }
}

impl From<bool> for TaskResult {
    fn from(success: bool) -> Self {
        if success {
            TaskResult::Success
        } else {
            TaskResult::Failure
        }
    }
}

macro_rules! impl_display_from_str {
    ($ty:ident { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {}: '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

impl_display_from_str!(TaskMode { "COOKIE" => Cookie, "PASSWORD" => Password });
impl_display_from_str!(TaskStatus { "ACTIVE" => Active, "PAUSED" => Paused });
impl_display_from_str!(TaskResult { "SUCCESS" => Success, "FAILURE" => Failure });

/// A persisted check-in task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub mode: TaskMode,
    /// Five-field cron expression: minute hour day-of-month month day-of-week.
    pub schedule: String,
    #[serde(default)]
    pub config: TaskConfig,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<TaskResult>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_status() -> TaskStatus {
    TaskStatus::Active
}

impl Task {
    /// Create an active task with an empty configuration.
    pub fn new(name: &str, mode: TaskMode, schedule: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.to_string(),
            mode,
            schedule: schedule.to_string(),
            config: TaskConfig::default(),
            status: TaskStatus::Active,
            last_run: None,
            last_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    /// Apply a partial edit and bump `updated_at`.
    pub fn apply_update(&mut self, update: TaskUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(schedule) = update.schedule {
            self.schedule = schedule;
        }
        if let Some(config) = update.config {
            self.config = config;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }
}

/// Edit of a task definition. Absent fields keep their current value;
/// ids, timestamps and run results cannot be edited.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub mode: Option<TaskMode>,
    pub schedule: Option<String>,
    pub config: Option<TaskConfig>,
    pub status: Option<TaskStatus>,
}

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: bool,
    pub output: String,
}

impl Log {
    /// Placeholder written before a run starts so in-progress runs are visible.
    pub const STARTED: &'static str = "Started...";

    pub fn started(task_id: &str) -> Self {
        Self {
            id: new_id(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            status: false,
            output: Self::STARTED.to_string(),
        }
    }
}

// ─── Task configuration ──────────────────────────────────────

/// Free-form task configuration as stored (a JSON object).
///
/// Recognized keys are read through the typed accessors below; everything
/// else is carried along untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskConfig(pub Map<String, Value>);

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Optional string; empty strings count as absent.
    pub fn opt_str(&self, key: &'static str) -> Result<Option<&str>, TaskConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(TaskConfigError::WrongType {
                key,
                expected: "a string",
            }),
        }
    }

    pub fn require_str(&self, key: &'static str) -> Result<&str, TaskConfigError> {
        self.opt_str(key)?.ok_or(TaskConfigError::MissingKey(key))
    }

    /// Optional object; absent means empty.
    pub fn opt_object(&self, key: &'static str) -> Result<Map<String, Value>, TaskConfigError> {
        match self.get(key) {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(TaskConfigError::WrongType {
                key,
                expected: "an object",
            }),
        }
    }

    /// Scheduling skew in seconds (`jitter`), 0 when unset.
    pub fn jitter(&self) -> Result<u64, TaskConfigError> {
        const KEY: &str = "jitter";
        match self.get(KEY) {
            None => Ok(0),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| TaskConfigError::InvalidValue {
                key: KEY,
                reason: format!("{n} is not a non-negative integer"),
            }),
            Some(Value::String(s)) => {
                s.trim()
                    .parse::<u64>()
                    .map_err(|e| TaskConfigError::InvalidValue {
                        key: KEY,
                        reason: format!("'{s}': {e}"),
                    })
            }
            Some(_) => Err(TaskConfigError::WrongType {
                key: KEY,
                expected: "an integer",
            }),
        }
    }

    /// Post-processing pattern (`result_regex`), `None` when unset or empty.
    pub fn result_regex(&self) -> Result<Option<&str>, TaskConfigError> {
        self.opt_str("result_regex")
    }
}

impl From<Map<String, Value>> for TaskConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// HTTP method for the cookie flow. Anything but POST is sent as GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("POST") {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }
}

/// Typed view of a COOKIE-mode configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieFlow {
    pub signin_url: String,
    pub cookie: Option<String>,
    pub method: HttpMethod,
    pub headers: Map<String, Value>,
}

impl CookieFlow {
    pub fn from_config(config: &TaskConfig) -> Result<Self, TaskConfigError> {
        Ok(Self {
            signin_url: config.require_str("signin_url")?.to_string(),
            cookie: config.opt_str("cookie")?.map(str::to_string),
            method: config
                .opt_str("method")?
                .map(HttpMethod::parse)
                .unwrap_or(HttpMethod::Get),
            headers: config.opt_object("headers")?,
        })
    }
}

/// Typed view of a PASSWORD-mode configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PasswordFlow {
    pub login_url: String,
    /// Sent as the JSON body of the login request.
    pub login_payload: Value,
    pub login_headers: Map<String, Value>,
    pub token_extract_rule: Option<String>,
    pub signin_url: String,
    /// String values may contain the `{token}` placeholder.
    pub signin_headers: Map<String, Value>,
}

impl PasswordFlow {
    pub fn from_config(config: &TaskConfig) -> Result<Self, TaskConfigError> {
        Ok(Self {
            login_url: config.require_str("login_url")?.to_string(),
            login_payload: config
                .get("login_payload")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
            login_headers: config.opt_object("login_headers")?,
            token_extract_rule: config.opt_str("token_extract_rule")?.map(str::to_string),
            signin_url: config.require_str("signin_url")?.to_string(),
            signin_headers: config.opt_object("signin_headers")?,
        })
    }
}
