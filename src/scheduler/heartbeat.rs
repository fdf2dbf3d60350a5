//! Periodic + event-driven heartbeat trigger.
//!
//! Reads a checkbox task file on every trigger, skips silently when there's
//! nothing pending (unless the trigger reason is `exec`), and suppresses
//! delivery of a reply that is either the bare `HEARTBEAT_OK` token or a
//! near-duplicate of a recent reply.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, OnceCell};
use tokio::task::JoinHandle;

use crate::config::HeartbeatConfig;
use crate::dispatch::MessageResponse;
use crate::error::GatewayError;

/// Why a heartbeat trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Interval,
    Cron,
    Exec,
    Requested,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::Interval => "interval",
            TriggerReason::Cron => "cron",
            TriggerReason::Exec => "exec",
            TriggerReason::Requested => "requested",
        }
    }
}

/// One pending or completed item parsed from the task file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatTask {
    pub description: String,
    pub completed: bool,
    pub line: usize,
}

/// Why a trigger produced no delivered reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoPendingTasks,
    DuplicateMessage,
    /// The reply was exactly (or entirely) the `HEARTBEAT_OK` token.
    HeartbeatOk,
}

/// Strip a leading or trailing `HEARTBEAT_OK` token (case-sensitive) and
/// trim surrounding whitespace. An input that is the bare token collapses
/// to an empty string, signalling "nothing to report".
pub fn strip_heartbeat_ok(text: &str) -> String {
    const TOKEN: &str = "HEARTBEAT_OK";
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix(TOKEN)
        .or_else(|| trimmed.strip_suffix(TOKEN))
        .unwrap_or(trimmed);
    stripped.trim().to_string()
}

/// Result of a single heartbeat trigger.
#[derive(Debug, Clone)]
pub enum HeartbeatOutcome {
    /// The callback ran and produced a reply worth delivering.
    Delivered(MessageResponse),
    /// The callback ran, but its reply is suppressed (HEARTBEAT_OK or a
    /// duplicate within the window).
    Suppressed(SkipReason),
    /// The callback never ran (no pending tasks, reason != exec).
    Skipped(SkipReason),
    /// The callback returned an error.
    Failed(String),
}

/// Invoked once per non-skipped trigger with the pending tasks.
#[async_trait]
pub trait HeartbeatCallback: Send + Sync {
    async fn on_tasks(
        &self,
        tasks: &[HeartbeatTask],
        reason: TriggerReason,
    ) -> Result<MessageResponse, GatewayError>;
}

struct Batch {
    done: Notify,
    result: OnceCell<HeartbeatOutcome>,
}

struct DuplicateWindow {
    entries: VecDeque<(String, Instant)>,
}

/// Drives the heartbeat task file + timer/event trigger loop.
pub struct HeartbeatScheduler {
    config: HeartbeatConfig,
    callback: Arc<dyn HeartbeatCallback>,
    deliver: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    guard: Mutex<()>,
    batch: Mutex<Option<Arc<Batch>>>,
    recent: Mutex<DuplicateWindow>,
}

impl HeartbeatScheduler {
    pub fn new(config: HeartbeatConfig, callback: Arc<dyn HeartbeatCallback>) -> Self {
        Self {
            config,
            callback,
            deliver: None,
            guard: Mutex::new(()),
            batch: Mutex::new(None),
            recent: Mutex::new(DuplicateWindow {
                entries: VecDeque::new(),
            }),
        }
    }

    /// Attach the sink invoked with the final, non-suppressed reply text.
    pub fn with_deliver(mut self, deliver: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.deliver = Some(deliver);
        self
    }

    /// Fire a trigger. Concurrent calls arriving within the configured
    /// coalescing window collapse into a single underlying run and all
    /// observe the same outcome.
    pub async fn request_now(self: &Arc<Self>, reason: TriggerReason) -> HeartbeatOutcome {
        let batch = {
            let mut slot = self.batch.lock().await;
            if let Some(existing) = slot.as_ref() {
                Arc::clone(existing)
            } else {
                let batch = Arc::new(Batch {
                    done: Notify::new(),
                    result: OnceCell::new(),
                });
                *slot = Some(Arc::clone(&batch));

                let scheduler = Arc::clone(self);
                let batch_for_task = Arc::clone(&batch);
                let window = self.config.coalesce_window;
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    let outcome = scheduler.run_trigger(reason).await;
                    let _ = batch_for_task.result.set(outcome);
                    batch_for_task.done.notify_waiters();
                    scheduler.batch.lock().await.take();
                });

                batch
            }
        };

        if let Some(outcome) = batch.result.get() {
            return outcome.clone();
        }
        batch.done.notified().await;
        batch
            .result
            .get()
            .cloned()
            .unwrap_or_else(|| HeartbeatOutcome::Failed("coalesced trigger produced no result".to_string()))
    }

    async fn run_trigger(&self, reason: TriggerReason) -> HeartbeatOutcome {
        let _serialize = self.guard.lock().await;

        let tasks = match parse_task_file(&self.config.task_file) {
            Ok(tasks) => tasks,
            Err(e) => return HeartbeatOutcome::Failed(format!("failed to read task file: {e}")),
        };
        let pending: Vec<HeartbeatTask> = tasks.into_iter().filter(|t| !t.completed).collect();

        if reason != TriggerReason::Exec && pending.is_empty() {
            return HeartbeatOutcome::Skipped(SkipReason::NoPendingTasks);
        }

        let response = match self.callback.on_tasks(&pending, reason).await {
            Ok(r) => r,
            Err(e) => return HeartbeatOutcome::Failed(e.to_string()),
        };

        let stripped = strip_heartbeat_ok(&response.text);
        if stripped.is_empty() {
            return HeartbeatOutcome::Suppressed(SkipReason::HeartbeatOk);
        }
        if self.is_duplicate(&stripped).await {
            return HeartbeatOutcome::Suppressed(SkipReason::DuplicateMessage);
        }
        self.remember(stripped.clone()).await;

        if let Some(deliver) = &self.deliver {
            deliver(&stripped);
        }
        HeartbeatOutcome::Delivered(MessageResponse {
            text: stripped,
            ..response
        })
    }

    async fn is_duplicate(&self, text: &str) -> bool {
        let mut window = self.recent.lock().await;
        prune_expired(&mut window.entries, self.config.duplicate_ttl);
        window.entries.iter().any(|(seen, _)| seen == text)
    }

    async fn remember(&self, text: String) {
        let mut window = self.recent.lock().await;
        prune_expired(&mut window.entries, self.config.duplicate_ttl);
        window.entries.push_back((text, Instant::now()));
        while window.entries.len() > self.config.duplicate_window {
            window.entries.pop_front();
        }
    }

    /// Spawn the interval-driven trigger loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                tracing::info!("heartbeat disabled, not starting loop");
                return;
            }
            let mut interval = tokio::time::interval(self.config.interval);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match self.request_now(TriggerReason::Interval).await {
                    HeartbeatOutcome::Delivered(_) => tracing::info!("heartbeat delivered a reply"),
                    HeartbeatOutcome::Suppressed(reason) => {
                        tracing::debug!(?reason, "heartbeat reply suppressed")
                    }
                    HeartbeatOutcome::Skipped(reason) => tracing::debug!(?reason, "heartbeat skipped"),
                    HeartbeatOutcome::Failed(err) => tracing::error!(%err, "heartbeat trigger failed"),
                }
            }
        })
    }
}

fn prune_expired(entries: &mut VecDeque<(String, Instant)>, ttl: Duration) {
    let now = Instant::now();
    entries.retain(|(_, seen_at)| now.duration_since(*seen_at) < ttl);
}

/// Parse checkbox lines (`- [ ] text` / `- [x] text`) out of a task file.
/// A missing file is treated as an empty task list.
pub fn parse_task_file(path: &Path) -> std::io::Result<Vec<HeartbeatTask>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_tasks(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn parse_tasks(content: &str) -> Vec<HeartbeatTask> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("- [ ] ") {
                Some(HeartbeatTask {
                    description: rest.trim().to_string(),
                    completed: false,
                    line: idx,
                })
            } else if let Some(rest) = trimmed.strip_prefix("- [x] ") {
                Some(HeartbeatTask {
                    description: rest.trim().to_string(),
                    completed: true,
                    line: idx,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pending_and_completed_tasks() {
        let content = "# Heartbeat\n- [ ] check mail\n- [x] reboot box\nnot a task line";
        let tasks = parse_tasks(content);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].description, "check mail");
        assert!(!tasks[0].completed);
        assert_eq!(tasks[1].description, "reboot box");
        assert!(tasks[1].completed);
    }

    #[test]
    fn empty_content_has_no_tasks() {
        assert!(parse_tasks("").is_empty());
        assert!(parse_tasks("# just a header\n\nno list items here").is_empty());
    }

    struct RecordingCallback {
        replies: Mutex<VecDeque<String>>,
    }
    #[async_trait]
    impl HeartbeatCallback for RecordingCallback {
        async fn on_tasks(
            &self,
            _tasks: &[HeartbeatTask],
            _reason: TriggerReason,
        ) -> Result<MessageResponse, GatewayError> {
            let mut replies = self.replies.lock().await;
            Ok(MessageResponse::ok(replies.pop_front().unwrap_or_default()))
        }
    }

    fn write_task_file(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("HEARTBEAT.md");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn skips_when_no_pending_tasks_and_reason_not_exec() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task_file(&dir, "# nothing pending\n- [x] done already");

        let mut config = HeartbeatConfig::default();
        config.task_file = path;
        config.coalesce_window = Duration::from_millis(1);

        let callback = Arc::new(RecordingCallback {
            replies: Mutex::new(VecDeque::from(vec!["should not run".to_string()])),
        });
        let scheduler = Arc::new(HeartbeatScheduler::new(config, callback));

        let outcome = scheduler.request_now(TriggerReason::Requested).await;
        assert!(matches!(
            outcome,
            HeartbeatOutcome::Skipped(SkipReason::NoPendingTasks)
        ));
    }

    #[tokio::test]
    async fn exec_reason_runs_even_with_no_pending_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task_file(&dir, "# nothing pending");

        let mut config = HeartbeatConfig::default();
        config.task_file = path;
        config.coalesce_window = Duration::from_millis(1);

        let callback = Arc::new(RecordingCallback {
            replies: Mutex::new(VecDeque::from(vec!["ran anyway".to_string()])),
        });
        let scheduler = Arc::new(HeartbeatScheduler::new(config, callback));

        let outcome = scheduler.request_now(TriggerReason::Exec).await;
        assert!(matches!(outcome, HeartbeatOutcome::Delivered(_)));
    }

    #[test]
    fn strip_heartbeat_ok_collapses_bare_token() {
        assert_eq!(strip_heartbeat_ok("HEARTBEAT_OK"), "");
        assert_eq!(strip_heartbeat_ok("  HEARTBEAT_OK  "), "");
    }

    #[test]
    fn strip_heartbeat_ok_leaves_remainder_after_leading_token() {
        assert_eq!(
            strip_heartbeat_ok("HEARTBEAT_OK\n\nFound 3 new commits"),
            "Found 3 new commits"
        );
    }

    #[test]
    fn strip_heartbeat_ok_leaves_remainder_before_trailing_token() {
        assert_eq!(
            strip_heartbeat_ok("Found 3 new commits\nHEARTBEAT_OK"),
            "Found 3 new commits"
        );
    }

    #[test]
    fn strip_heartbeat_ok_is_case_sensitive() {
        assert_eq!(strip_heartbeat_ok("heartbeat_ok"), "heartbeat_ok");
    }

    #[tokio::test]
    async fn heartbeat_ok_reply_is_suppressed_and_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task_file(&dir, "- [ ] check repo");

        let mut config = HeartbeatConfig::default();
        config.task_file = path;
        config.coalesce_window = Duration::from_millis(1);

        let callback = Arc::new(RecordingCallback {
            replies: Mutex::new(VecDeque::from(vec!["HEARTBEAT_OK".to_string()])),
        });
        let delivered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = Arc::clone(&delivered);
        let scheduler = Arc::new(
            HeartbeatScheduler::new(config, callback).with_deliver(Arc::new(move |text: &str| {
                let delivered = Arc::clone(&delivered_clone);
                let text = text.to_string();
                tokio::spawn(async move {
                    delivered.lock().await.push(text);
                });
            })),
        );

        let outcome = scheduler.request_now(TriggerReason::Requested).await;
        assert!(matches!(
            outcome,
            HeartbeatOutcome::Suppressed(SkipReason::HeartbeatOk)
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_reply_is_suppressed_but_callback_still_ran() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task_file(&dir, "- [ ] recurring task");

        let mut config = HeartbeatConfig::default();
        config.task_file = path;
        config.coalesce_window = Duration::from_millis(1);
        config.duplicate_window = 5;
        config.duplicate_ttl = Duration::from_secs(60);

        let callback = Arc::new(RecordingCallback {
            replies: Mutex::new(VecDeque::from(vec!["same message".to_string(), "same message".to_string()])),
        });
        let scheduler = Arc::new(HeartbeatScheduler::new(config, callback));

        let first = scheduler.request_now(TriggerReason::Requested).await;
        assert!(matches!(first, HeartbeatOutcome::Delivered(_)));

        let second = scheduler.request_now(TriggerReason::Requested).await;
        assert!(matches!(
            second,
            HeartbeatOutcome::Suppressed(SkipReason::DuplicateMessage)
        ));
    }
}
