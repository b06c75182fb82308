//! # CheckIn Scheduler
//!
//! Runs HTTP check-in tasks on cron schedules and records every run.
//!
//! ## Design Principles
//! - SQLite persistence: tasks and run history survive restarts
//! - Tokio timers only: one interval loop, runs spawned per firing
//! - A run never takes the scheduler down: errors and panics become failed logs
//! - Notification is best effort: the hub being down never fails a run
//!
//! ## Architecture
//! ```text
//! JobScheduler (tokio interval)
//!   ├── resync: ACTIVE tasks → cron jobs (+ jitter)
//!   └── on fire → ExecutionEngine::execute_task
//!                   ├── Log "Started..."
//!                   ├── FlowExecutor
//!                   │     ├── COOKIE: one request with the stored cookie
//!                   │     └── PASSWORD: login → extract token → sign in
//!                   ├── result_regex filter
//!                   ├── task last_run / last_result + final log
//!                   └── WebhookNotifier (notification hub)
//! ```

pub mod cron;
pub mod engine;
pub mod flow;
pub mod notify;
pub mod persistence;
pub mod postprocess;
pub mod scheduler;
pub mod store;

pub use cron::{CronError, CronSchedule};
pub use engine::{ExecutionEngine, RunReport};
pub use flow::{FlowExecutor, FlowOutcome};
pub use notify::WebhookNotifier;
pub use persistence::SqliteStore;
pub use scheduler::JobScheduler;
pub use store::MemoryStore;
