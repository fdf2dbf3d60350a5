//! Persistent cron-style job scheduler.
//!
//! Holds an `id -> CronJob` map backed by a JSON file, with exactly one
//! outstanding timer aimed at the earliest upcoming `next_run_at_ms`
//! across enabled jobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::dispatch::MessageResponse;
use crate::error::GatewayError;

/// One of the three schedule kinds a job can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fires once at an absolute timestamp, then disables itself.
    At { at_ms: i64 },
    /// Fires every `interval_ms` milliseconds.
    Every { interval_ms: i64 },
    /// A restricted five-field cron expression (`* * * * *` / `M * * * *` / `M H * * *`).
    Expr { expr: String },
}

/// A persisted scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    pub name: String,
    pub instruction: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub created_at_ms: i64,
    pub last_run_at_ms: Option<i64>,
    pub next_run_at_ms: Option<i64>,
}

/// Fields accepted when adding a new job.
#[derive(Debug, Clone)]
pub struct NewCronJob {
    pub name: String,
    pub instruction: String,
    pub schedule: Schedule,
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone)]
pub struct CronStatus {
    pub job_count: usize,
    pub next_run_at_ms: Option<i64>,
}

/// Invoked once per fired job.
#[async_trait]
pub trait CronCallback: Send + Sync {
    async fn on_job(&self, job: &CronJob) -> Result<MessageResponse, GatewayError>;
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedJobs {
    jobs: Vec<CronJob>,
}

struct Inner {
    jobs: Mutex<HashMap<Uuid, CronJob>>,
    jobs_file: PathBuf,
    callback: Arc<dyn CronCallback>,
    reschedule: Notify,
    shutting_down: AtomicBool,
}

/// Owns the job map and the single background timer task.
pub struct CronScheduler {
    inner: Arc<Inner>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronScheduler {
    pub fn new(jobs_file: PathBuf, callback: Arc<dyn CronCallback>) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                jobs_file,
                callback,
                reschedule: Notify::new(),
                shutting_down: AtomicBool::new(false),
            }),
            timer_handle: Mutex::new(None),
        }
    }

    /// Load persisted jobs (a missing file means an empty map) and start
    /// the timer loop.
    pub async fn initialize(&self) -> Result<(), GatewayError> {
        let loaded = load_jobs(&self.inner.jobs_file)?;
        {
            let mut jobs = self.inner.jobs.lock().await;
            *jobs = loaded.into_iter().map(|j| (j.id, j)).collect();
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(timer_loop(inner));
        *self.timer_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn add_job(&self, input: NewCronJob) -> Result<CronJob, GatewayError> {
        let next_run_at_ms = compute_next_run(&input.schedule, Utc::now())?;

        let job = CronJob {
            id: Uuid::new_v4(),
            name: input.name,
            instruction: input.instruction,
            schedule: input.schedule,
            enabled: true,
            created_at_ms: now_ms(),
            last_run_at_ms: None,
            next_run_at_ms,
        };

        {
            let mut jobs = self.inner.jobs.lock().await;
            jobs.insert(job.id, job.clone());
        }
        self.persist().await?;
        self.inner.reschedule.notify_waiters();
        Ok(job)
    }

    pub async fn remove_job(&self, id: Uuid) -> Result<(), GatewayError> {
        {
            let mut jobs = self.inner.jobs.lock().await;
            jobs.remove(&id);
        }
        self.persist().await?;
        self.inner.reschedule.notify_waiters();
        Ok(())
    }

    /// Manually fire a job without awaiting its callback, so a callback
    /// that itself dispatches through the same lane this call originated
    /// from cannot deadlock against itself.
    pub async fn run_job(&self, id: Uuid) -> Result<(), GatewayError> {
        let job = {
            let jobs = self.inner.jobs.lock().await;
            jobs.get(&id).cloned()
        };
        let Some(job) = job else {
            return Err(GatewayError::StorageUnavailable {
                reason: format!("no such cron job: {id}"),
            });
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.callback.on_job(&job).await {
                tracing::error!(job_id = %job.id, error = %e, "manual cron run failed");
            }
        });
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.inner.jobs.lock().await.values().cloned().collect()
    }

    pub async fn get_job(&self, id: Uuid) -> Option<CronJob> {
        self.inner.jobs.lock().await.get(&id).cloned()
    }

    pub async fn get_status(&self) -> CronStatus {
        let jobs = self.inner.jobs.lock().await;
        CronStatus {
            job_count: jobs.len(),
            next_run_at_ms: earliest_next_run(&jobs),
        }
    }

    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, AtomicOrdering::SeqCst);
        self.inner.reschedule.notify_waiters();
        if let Some(handle) = self.timer_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn persist(&self) -> Result<(), GatewayError> {
        let jobs: Vec<CronJob> = self.inner.jobs.lock().await.values().cloned().collect();
        save_jobs(&self.inner.jobs_file, &jobs)
    }
}

async fn timer_loop(inner: Arc<Inner>) {
    loop {
        if inner.shutting_down.load(AtomicOrdering::SeqCst) {
            return;
        }

        let wait_until = {
            let jobs = inner.jobs.lock().await;
            earliest_next_run(&jobs)
        };

        match wait_until {
            Some(target_ms) => {
                let delay_ms = (target_ms - now_ms()).max(0) as u64;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                        fire_due_jobs(&inner).await;
                    }
                    _ = inner.reschedule.notified() => {}
                }
            }
            None => inner.reschedule.notified().await,
        }
    }
}

async fn fire_due_jobs(inner: &Arc<Inner>) {
    let now = now_ms();
    let due: Vec<CronJob> = {
        let jobs = inner.jobs.lock().await;
        jobs.values()
            .filter(|j| j.enabled && j.next_run_at_ms.map(|t| t <= now).unwrap_or(false))
            .cloned()
            .collect()
    };

    for mut job in due {
        job.last_run_at_ms = Some(now_ms());
        job.next_run_at_ms = match &job.schedule {
            Schedule::At { .. } => {
                job.enabled = false;
                None
            }
            _ => compute_next_run(&job.schedule, Utc::now()).unwrap_or(None),
        };

        {
            let mut jobs = inner.jobs.lock().await;
            jobs.insert(job.id, job.clone());
        }
        let jobs_snapshot: Vec<CronJob> = inner.jobs.lock().await.values().cloned().collect();
        if let Err(e) = save_jobs(&inner.jobs_file, &jobs_snapshot) {
            tracing::error!(error = %e, "failed to persist cron jobs after firing");
        }

        if let Err(e) = inner.callback.on_job(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "cron callback failed");
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn earliest_next_run(jobs: &HashMap<Uuid, CronJob>) -> Option<i64> {
    jobs.values()
        .filter(|j| j.enabled)
        .filter_map(|j| j.next_run_at_ms)
        .min()
}

fn load_jobs(path: &Path) -> Result<Vec<CronJob>, GatewayError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let parsed: PersistedJobs = serde_json::from_str(&content).map_err(|e| GatewayError::StorageUnavailable {
                reason: format!("malformed cron jobs file: {e}"),
            })?;
            Ok(parsed.jobs)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(GatewayError::StorageUnavailable {
            reason: format!("failed to read cron jobs file: {e}"),
        }),
    }
}

fn save_jobs(path: &Path, jobs: &[CronJob]) -> Result<(), GatewayError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GatewayError::StorageUnavailable {
            reason: format!("failed to create cron state dir: {e}"),
        })?;
    }
    let payload = serde_json::to_vec_pretty(&PersistedJobs {
        jobs: jobs.to_vec(),
    })
    .map_err(|e| GatewayError::StorageUnavailable {
        reason: format!("failed to serialize cron jobs: {e}"),
    })?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, payload).map_err(|e| GatewayError::StorageUnavailable {
        reason: format!("failed to write cron jobs temp file: {e}"),
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| GatewayError::StorageUnavailable {
        reason: format!("failed to replace cron jobs file: {e}"),
    })
}

enum ExprKind {
    EveryMinute,
    AtMinute(u32),
    AtMinuteHour(u32, u32),
}

fn parse_expr(expr: &str) -> Result<ExprKind, GatewayError> {
    let invalid = || GatewayError::ScheduleParse("Invalid cron expression".to_string());

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid());
    }
    let (minute, hour, dom, month, dow) = (fields[0], fields[1], fields[2], fields[3], fields[4]);
    if dom != "*" || month != "*" || dow != "*" {
        return Err(invalid());
    }

    match (minute, hour) {
        ("*", "*") => Ok(ExprKind::EveryMinute),
        (m, "*") => {
            let m: u32 = m.parse().map_err(|_| invalid())?;
            if m > 59 {
                return Err(invalid());
            }
            Ok(ExprKind::AtMinute(m))
        }
        (m, h) => {
            let m: u32 = m.parse().map_err(|_| invalid())?;
            let h: u32 = h.parse().map_err(|_| invalid())?;
            if m > 59 || h > 23 {
                return Err(invalid());
            }
            Ok(ExprKind::AtMinuteHour(m, h))
        }
    }
}

fn floor_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt - chrono::Duration::seconds(dt.second() as i64) - chrono::Duration::nanoseconds(dt.nanosecond() as i64)
}

fn next_every_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_minute(now) + chrono::Duration::minutes(1)
}

fn next_at_minute(now: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
    let base = floor_to_minute(now)
        .with_minute(minute)
        .expect("minute already validated by parse_expr");
    if base > now {
        base
    } else {
        base + chrono::Duration::hours(1)
    }
}

fn next_at_minute_hour(now: DateTime<Utc>, minute: u32, hour: u32) -> DateTime<Utc> {
    let base = floor_to_minute(now)
        .with_minute(minute)
        .and_then(|dt| dt.with_hour(hour))
        .expect("minute/hour already validated by parse_expr");
    if base > now {
        base
    } else {
        base + chrono::Duration::days(1)
    }
}

/// Compute the next fire time for a schedule. `Ok(None)` means the
/// schedule is dormant (an `at` time already in the past).
fn compute_next_run(schedule: &Schedule, now: DateTime<Utc>) -> Result<Option<i64>, GatewayError> {
    match schedule {
        Schedule::At { at_ms } => {
            if *at_ms > now.timestamp_millis() {
                Ok(Some(*at_ms))
            } else {
                Ok(None)
            }
        }
        Schedule::Every { interval_ms } => Ok(Some(now.timestamp_millis() + interval_ms)),
        Schedule::Expr { expr } => {
            let kind = parse_expr(expr)?;
            let next = match kind {
                ExprKind::EveryMinute => next_every_minute(now),
                ExprKind::AtMinute(m) => next_at_minute(now, m),
                ExprKind::AtMinuteHour(m, h) => next_at_minute_hour(now, m, h),
            };
            Ok(Some(next.timestamp_millis()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct NoopCallback;
    #[async_trait]
    impl CronCallback for NoopCallback {
        async fn on_job(&self, _job: &CronJob) -> Result<MessageResponse, GatewayError> {
            Ok(MessageResponse::ok("ran"))
        }
    }

    #[test]
    fn rejects_expressions_with_non_wildcard_date_fields() {
        assert!(parse_expr("0 9 1 * *").is_err());
        assert!(parse_expr("0 9 * 6 *").is_err());
        assert!(parse_expr("0 9 * * 1").is_err());
    }

    #[test]
    fn rejects_malformed_field_count() {
        assert!(parse_expr("* * *").is_err());
    }

    #[test]
    fn accepts_the_three_supported_shapes() {
        assert!(parse_expr("* * * * *").is_ok());
        assert!(parse_expr("30 * * * *").is_ok());
        assert!(parse_expr("30 9 * * *").is_ok());
    }

    #[test]
    fn next_at_minute_hour_advances_a_day_when_passed() {
        let now = Utc.with_ymd_and_hms(2026, 7, 26, 10, 0, 0).unwrap();
        let next = next_at_minute_hour(now, 0, 9); // 09:00, already passed today
        assert_eq!(next.day(), 27);
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn next_at_minute_hour_same_day_when_upcoming() {
        let now = Utc.with_ymd_and_hms(2026, 7, 26, 8, 0, 0).unwrap();
        let next = next_at_minute_hour(now, 0, 9);
        assert_eq!(next.day(), 26);
        assert_eq!(next.hour(), 9);
    }

    #[tokio::test]
    async fn at_schedule_auto_disables_after_firing() {
        let dir = tempfile::tempdir().unwrap();
        let jobs_file = dir.path().join("cron_jobs.json");
        let scheduler = CronScheduler::new(jobs_file, Arc::new(NoopCallback));
        scheduler.initialize().await.unwrap();

        let job = scheduler
            .add_job(NewCronJob {
                name: "one-shot".to_string(),
                instruction: "do a thing".to_string(),
                schedule: Schedule::At {
                    at_ms: now_ms() + 20,
                },
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let updated = scheduler.get_job(job.id).await.unwrap();
        assert!(!updated.enabled);
        assert!(updated.next_run_at_ms.is_none());
        assert!(updated.last_run_at_ms.is_some());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn persistence_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let jobs_file = dir.path().join("cron_jobs.json");

        let a = CronScheduler::new(jobs_file.clone(), Arc::new(NoopCallback));
        a.initialize().await.unwrap();
        let job = a
            .add_job(NewCronJob {
                name: "recurring".to_string(),
                instruction: "poll".to_string(),
                schedule: Schedule::Every { interval_ms: 60_000 },
            })
            .await
            .unwrap();
        a.shutdown().await;

        let b = CronScheduler::new(jobs_file, Arc::new(NoopCallback));
        b.initialize().await.unwrap();
        let loaded = b.get_job(job.id).await.unwrap();
        assert_eq!(loaded.name, "recurring");
        assert_eq!(loaded.schedule, Schedule::Every { interval_ms: 60_000 });
        b.shutdown().await;
    }

    #[tokio::test]
    async fn add_job_rejects_invalid_expr_without_mutating_state() {
        let dir = tempfile::tempdir().unwrap();
        let jobs_file = dir.path().join("cron_jobs.json");
        let scheduler = CronScheduler::new(jobs_file, Arc::new(NoopCallback));
        scheduler.initialize().await.unwrap();

        let result = scheduler
            .add_job(NewCronJob {
                name: "bad".to_string(),
                instruction: "x".to_string(),
                schedule: Schedule::Expr {
                    expr: "0 9 1 * *".to_string(),
                },
            })
            .await;
        assert!(result.is_err());
        assert!(scheduler.list_jobs().await.is_empty());

        scheduler.shutdown().await;
    }
}
