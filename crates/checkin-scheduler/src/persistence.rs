//! SQLite-backed task and log store.
//! One connection per session, so concurrent runs never share a handle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use checkin_core::error::{CheckinError, Result};
use checkin_core::traits::{StoreSession, TaskStore};
use checkin_core::types::{Log, Task, TaskConfig, TaskResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

const TASK_COLUMNS: &str =
    "id, name, mode, schedule, config, status, last_run, last_result, created_at, updated_at";

/// SQLite store. Cheap to share; every session opens its own connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        store.migrate()?;
        tracing::debug!("💾 Task store ready at {}", path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(store_err("DB open"))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(store_err("Busy timeout"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(store_err("Foreign keys"))?;
        Ok(conn)
    }

    fn migrate(&self) -> Result<()> {
        self.connect()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mode TEXT NOT NULL,              -- 'COOKIE', 'PASSWORD'
                schedule TEXT NOT NULL,          -- 5-field cron
                config TEXT NOT NULL DEFAULT '{}',  -- JSON object
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                last_run TEXT,
                last_result TEXT,                -- 'SUCCESS', 'FAILURE'
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS logs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                timestamp TEXT NOT NULL,
                status INTEGER NOT NULL,
                output TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_logs_task_time ON logs(task_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_logs_time ON logs(timestamp);
         ",
            )
            .map_err(store_err("Migration"))
    }
}

impl TaskStore for SqliteStore {
    fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(SqliteSession {
            conn: self.connect()?,
        }))
    }
}

struct SqliteSession {
    conn: Connection,
}

/// Raw `tasks` row before decoding.
struct TaskRow {
    id: String,
    name: String,
    mode: String,
    schedule: String,
    config: String,
    status: String,
    last_run: Option<String>,
    last_result: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            mode: row.get(2)?,
            schedule: row.get(3)?,
            config: row.get(4)?,
            status: row.get(5)?,
            last_run: row.get(6)?,
            last_result: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Task> {
        let bad =
            |what: &str, e: String| CheckinError::Store(format!("task {}: {what}: {e}", self.id));
        let config: TaskConfig =
            serde_json::from_str(&self.config).map_err(|e| bad("config", e.to_string()))?;
        Ok(Task {
            mode: self.mode.parse().map_err(|e| bad("mode", e))?,
            status: self.status.parse().map_err(|e| bad("status", e))?,
            last_result: self
                .last_result
                .as_deref()
                .map(str::parse::<TaskResult>)
                .transpose()
                .map_err(|e| bad("last_result", e))?,
            last_run: self
                .last_run
                .as_deref()
                .map(parse_ts)
                .transpose()
                .map_err(|e| bad("last_run", e))?,
            created_at: parse_ts(&self.created_at).map_err(|e| bad("created_at", e))?,
            updated_at: parse_ts(&self.updated_at).map_err(|e| bad("updated_at", e))?,
            config,
            name: self.name,
            schedule: self.schedule,
            id: self.id,
        })
    }
}

type LogRow = (String, String, String, bool, String);

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get::<_, i64>(3)? != 0,
        row.get(4)?,
    ))
}

fn decode_log((id, task_id, timestamp, status, output): LogRow) -> Result<Log> {
    let timestamp = parse_ts(&timestamp)
        .map_err(|e| CheckinError::Store(format!("log {id}: timestamp: {e}")))?;
    Ok(Log {
        id,
        task_id,
        timestamp,
        status,
        output,
    })
}

impl StoreSession for SqliteSession {
    fn get_task(&mut self, id: &str) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                TaskRow::read,
            )
            .optional()
            .map_err(store_err("Get task"))?;
        row.map(TaskRow::decode).transpose()
    }

    fn list_tasks(&mut self) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at"))
            .map_err(store_err("List tasks"))?;
        let rows = stmt
            .query_map([], TaskRow::read)
            .map_err(store_err("List tasks"))?;

        let mut tasks = Vec::new();
        for row in rows {
            match row.map_err(store_err("Read task")).and_then(TaskRow::decode) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable task row: {e}"),
            }
        }
        Ok(tasks)
    }

    fn insert_task(&mut self, task: &Task) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    task.id,
                    task.name,
                    task.mode.as_str(),
                    task.schedule,
                    serde_json::to_string(&task.config)?,
                    task.status.as_str(),
                    task.last_run.map(ts),
                    task.last_result.map(|r| r.as_str()),
                    ts(task.created_at),
                    ts(task.updated_at),
                ],
            )
            .map_err(store_err("Insert task"))?;
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET name = ?2, mode = ?3, schedule = ?4, config = ?5, status = ?6,
                     last_run = ?7, last_result = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    task.id,
                    task.name,
                    task.mode.as_str(),
                    task.schedule,
                    serde_json::to_string(&task.config)?,
                    task.status.as_str(),
                    task.last_run.map(ts),
                    task.last_result.map(|r| r.as_str()),
                    ts(task.updated_at),
                ],
            )
            .map_err(store_err("Update task"))?;
        if changed == 0 {
            return Err(CheckinError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    fn delete_task(&mut self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", [id])
            .map_err(store_err("Delete task"))?;
        Ok(changed > 0)
    }

    fn record_run(&mut self, task_id: &str, at: DateTime<Utc>, result: TaskResult) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET last_run = ?2, last_result = ?3 WHERE id = ?1",
                params![task_id, ts(at), result.as_str()],
            )
            .map_err(store_err("Record run"))?;
        Ok(())
    }

    fn get_log(&mut self, id: &str) -> Result<Option<Log>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, task_id, timestamp, status, output FROM logs WHERE id = ?1",
                [id],
                log_from_row,
            )
            .optional()
            .map_err(store_err("Get log"))?;
        row.map(decode_log).transpose()
    }

    fn insert_log(&mut self, log: &Log) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO logs (id, task_id, timestamp, status, output) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![log.id, log.task_id, ts(log.timestamp), log.status as i32, log.output],
            )
            .map_err(store_err("Insert log"))?;
        Ok(())
    }

    fn update_log(&mut self, log: &Log) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE logs SET status = ?2, output = ?3 WHERE id = ?1",
                params![log.id, log.status as i32, log.output],
            )
            .map_err(store_err("Update log"))?;
        if changed == 0 {
            return Err(CheckinError::NotFound(format!("log {}", log.id)));
        }
        Ok(())
    }

    fn list_logs(&mut self, task_id: Option<&str>, limit: usize) -> Result<Vec<Log>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_id, timestamp, status, output FROM logs
                 WHERE ?1 IS NULL OR task_id = ?1
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
            )
            .map_err(store_err("List logs"))?;
        let rows = stmt
            .query_map(params![task_id, limit as i64], log_from_row)
            .map_err(store_err("List logs"))?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(decode_log(row.map_err(store_err("Read log"))?)?);
        }
        Ok(logs)
    }
}

/// Fixed-width UTC timestamps sort correctly as text.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

fn store_err(context: &'static str) -> impl Fn(rusqlite::Error) -> CheckinError {
    move |e| CheckinError::Store(format!("{context}: {e}"))
}
