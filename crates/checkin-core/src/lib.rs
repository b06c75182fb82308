//! # CheckIn Core
//!
//! Shared building blocks for the check-in runner: the task and log data
//! model, typed views over a task's free-form configuration, the error type,
//! the configuration system, and the traits the scheduler uses to reach its
//! collaborators (persistence and outbound notification).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CheckinConfig;
pub use error::{CheckinError, Result, TaskConfigError};
pub use traits::{RunNotifier, StoreSession, TaskStore};
pub use types::{
    CookieFlow, HttpMethod, Log, PasswordFlow, Task, TaskConfig, TaskMode, TaskResult, TaskStatus,
    TaskUpdate,
};
