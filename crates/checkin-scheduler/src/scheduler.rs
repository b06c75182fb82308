//! Job scheduler: keeps one cron job per ACTIVE task and fires due jobs
//! through the execution engine.
//!
//! The job set is rebuilt from the store on every [`JobScheduler::resync`].
//! Tasks with an invalid schedule or jitter are skipped with a warning and
//! never abort the sync. A task whose schedule and jitter are unchanged keeps
//! its pending fire time across syncs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, Utc};
use checkin_core::config::{ScheduleTimezone, SchedulerConfig};
use checkin_core::types::Task;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cron::CronSchedule;
use crate::engine::ExecutionEngine;

#[derive(Debug, Clone)]
struct ScheduledJob {
    task_name: String,
    cron: CronSchedule,
    jitter_secs: u64,
    /// Un-jittered fire time; the next one is computed from here.
    base_fire: DateTime<Utc>,
    next_fire: DateTime<Utc>,
}

/// Cron-driven scheduler. Clones share the same job set.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<ExecutionEngine>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    timezone: ScheduleTimezone,
    tick: Duration,
    resync_interval: Option<Duration>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(engine: Arc<ExecutionEngine>, config: &SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                jobs: Mutex::new(HashMap::new()),
                timezone: config.timezone,
                tick: Duration::from_millis(config.tick_millis.max(1)),
                resync_interval: (config.resync_interval_secs > 0)
                    .then(|| Duration::from_secs(config.resync_interval_secs)),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.inner.engine
    }

    /// Spawn the driver loop. Does nothing if already running.
    pub fn start(&self) {
        let mut driver = lock(&self.inner.driver);
        if driver.is_some() {
            tracing::warn!("⚠️ Scheduler already running");
            return;
        }
        let scheduler = self.clone();
        *driver = Some(tokio::spawn(scheduler.drive()));
        tracing::info!(
            "⏰ Scheduler started (check every {}ms, {:?} clock)",
            self.inner.tick.as_millis(),
            self.inner.timezone
        );
    }

    /// Stop firing jobs. Runs already in flight are left to finish.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.inner.driver).take() {
            handle.abort();
            tracing::info!("🛑 Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.driver).is_some()
    }

    async fn drive(self) {
        let mut interval = tokio::time::interval(self.inner.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_resync = Instant::now();

        loop {
            interval.tick().await;

            if let Some(period) = self.inner.resync_interval
                && last_resync.elapsed() >= period
            {
                self.resync();
                last_resync = Instant::now();
            }

            self.fire_due(Utc::now());
        }
    }

    /// Rebuild the job set from the store and return the number of jobs.
    /// If the task list cannot be read the current jobs are kept.
    pub fn resync(&self) -> usize {
        let tasks = match self
            .inner
            .engine
            .store()
            .session()
            .and_then(|mut session| session.list_tasks())
        {
            Ok(tasks) => tasks,
            Err(e) => {
                let kept = self.job_count();
                tracing::error!("💥 Cannot read tasks, keeping {kept} scheduled job(s): {e}");
                return kept;
            }
        };

        let now = Utc::now();
        let mut jobs = lock(&self.inner.jobs);
        let mut synced = HashMap::new();
        for task in tasks.iter().filter(|t| t.is_active()) {
            match plan_job(task, self.inner.timezone, now) {
                Ok(mut job) => {
                    if let Some(current) = jobs.get(&task.id)
                        && current.cron == job.cron
                        && current.jitter_secs == job.jitter_secs
                    {
                        job.base_fire = current.base_fire;
                        job.next_fire = current.next_fire;
                    }
                    tracing::debug!("📅 '{}' next run at {}", task.name, job.next_fire);
                    synced.insert(task.id.clone(), job);
                }
                Err(reason) => {
                    tracing::warn!("⚠️ Skipping task '{}' ({}): {reason}", task.name, task.id)
                }
            }
        }

        let count = synced.len();
        let changed = count != jobs.len() || synced.keys().any(|id| !jobs.contains_key(id));
        *jobs = synced;
        if changed {
            tracing::info!("📅 Scheduler synced: {count} job(s) from {} task(s)", tasks.len());
        } else {
            tracing::debug!("📅 Scheduler synced: {count} job(s), no change");
        }
        count
    }

    /// Called after any task create/update/delete.
    pub fn notify_task_changed(&self, task_id: &str) {
        tracing::debug!("Task {task_id} changed, resyncing");
        self.resync();
    }

    /// Next fire time of a task's job, `None` if it is not scheduled.
    pub fn next_run_time(&self, task_id: &str) -> Option<DateTime<Utc>> {
        lock(&self.inner.jobs).get(task_id).map(|job| job.next_fire)
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.jobs).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn job_count(&self) -> usize {
        lock(&self.inner.jobs).len()
    }

    /// Fire every job due at `now` and advance it. Missed fire times
    /// collapse into a single run. Must be called inside a tokio runtime.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let timezone = self.inner.timezone;
        let mut due = Vec::new();
        lock(&self.inner.jobs).retain(|task_id, job| {
            if job.next_fire > now {
                return true;
            }
            due.push((task_id.clone(), job.task_name.clone()));
            match next_base(timezone, &job.cron, now.max(job.base_fire)) {
                Some(base) => {
                    job.base_fire = base;
                    job.next_fire = jittered(base, job.jitter_secs);
                    true
                }
                None => {
                    tracing::info!("📅 '{}' has no further fire times", job.task_name);
                    false
                }
            }
        });

        due.into_iter()
            .map(|(task_id, task_name)| {
                tracing::info!("⏰ Firing '{task_name}'");
                let engine = Arc::clone(&self.inner.engine);
                tokio::spawn(async move {
                    engine.execute_task(&task_id).await;
                })
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn plan_job(
    task: &Task,
    timezone: ScheduleTimezone,
    now: DateTime<Utc>,
) -> Result<ScheduledJob, String> {
    let cron = CronSchedule::parse(&task.schedule).map_err(|e| e.to_string())?;
    let jitter_secs = task.config.jitter().map_err(|e| e.to_string())?;
    let base_fire = next_base(timezone, &cron, now)
        .ok_or_else(|| format!("schedule '{cron}' never fires"))?;
    Ok(ScheduledJob {
        task_name: task.name.clone(),
        cron,
        jitter_secs,
        base_fire,
        next_fire: jittered(base_fire, jitter_secs),
    })
}

/// Next cron match after `after`, evaluated on the configured clock.
fn next_base(
    timezone: ScheduleTimezone,
    cron: &CronSchedule,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match timezone {
        ScheduleTimezone::Utc => cron.next_after(&after),
        ScheduleTimezone::Local => cron
            .next_after(&after.with_timezone(&Local))
            .map(|t| t.with_timezone(&Utc)),
    }
}

/// `base` shifted by a uniform -jitter..=jitter seconds. An early fire time
/// already in the past fires on the next tick.
fn jittered(base: DateTime<Utc>, jitter_secs: u64) -> DateTime<Utc> {
    if jitter_secs == 0 {
        return base;
    }
    let bound = i64::try_from(jitter_secs).unwrap_or(i64::MAX);
    let offset = rand::thread_rng().gen_range(-bound..=bound);
    TimeDelta::try_seconds(offset)
        .and_then(|delta| base.checked_add_signed(delta))
        .unwrap_or(base)
}
