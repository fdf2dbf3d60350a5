//! Builds the callbacks that glue the heartbeat and cron schedulers to
//! the dispatcher: exact instruction-string formatting, reserved session
//! keys, and swallowing dispatch errors behind an `on_error` hook.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::{DispatchCallbacks, DispatchRequest, MessageResponse, Sender, Source, SourceAdapter};
use crate::error::GatewayError;
use crate::scheduler::cron::{CronCallback, CronJob};
use crate::scheduler::heartbeat::{HeartbeatCallback, HeartbeatTask, TriggerReason};
use crate::session::{CRON_SESSION_KEY, HEARTBEAT_SESSION_KEY};

/// Elevated priority both scheduled lanes dispatch at, above the
/// dispatcher's bare heartbeat/cron source defaults.
const SCHEDULED_PRIORITY: u8 = 5;

/// Dispatches heartbeat triggers through a [`SourceAdapter`] bound to
/// `Source::Heartbeat`.
pub struct HeartbeatDispatchCallback {
    adapter: Arc<SourceAdapter>,
    on_error: Arc<dyn Fn(&GatewayError, &str) + Send + Sync>,
}

impl HeartbeatDispatchCallback {
    pub fn new(adapter: Arc<SourceAdapter>, on_error: Arc<dyn Fn(&GatewayError, &str) + Send + Sync>) -> Self {
        Self { adapter, on_error }
    }
}

#[async_trait]
impl HeartbeatCallback for HeartbeatDispatchCallback {
    async fn on_tasks(
        &self,
        tasks: &[HeartbeatTask],
        reason: TriggerReason,
    ) -> Result<MessageResponse, GatewayError> {
        if tasks.is_empty() {
            return Ok(MessageResponse::ok(""));
        }

        let task_list = tasks
            .iter()
            .map(|t| t.description.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let instruction = format!(
            "[HEARTBEAT: {}] Execute pending tasks: {}. Reply with your report for the user. \
             Only reply HEARTBEAT_OK if HEARTBEAT.md does not require any reporting.",
            reason.as_str(),
            task_list
        );

        let request = DispatchRequest::new(
            Source::Heartbeat,
            HEARTBEAT_SESSION_KEY,
            Sender::new(HEARTBEAT_SESSION_KEY),
            instruction,
        )
        .with_priority(SCHEDULED_PRIORITY)
        .with_callbacks(DispatchCallbacks::default());

        let result = self.adapter.handle_request(request).await;

        if let Err(e) = &result {
            (self.on_error)(e, "heartbeat");
        }
        result
    }
}

/// Dispatches cron firings through a [`SourceAdapter`] bound to `Source::Cron`.
pub struct CronDispatchCallback {
    adapter: Arc<SourceAdapter>,
    on_error: Arc<dyn Fn(&GatewayError, &str) + Send + Sync>,
}

impl CronDispatchCallback {
    pub fn new(adapter: Arc<SourceAdapter>, on_error: Arc<dyn Fn(&GatewayError, &str) + Send + Sync>) -> Self {
        Self { adapter, on_error }
    }
}

#[async_trait]
impl CronCallback for CronDispatchCallback {
    async fn on_job(&self, job: &CronJob) -> Result<MessageResponse, GatewayError> {
        let instruction = format!("[CRON TASK: {}] {}", job.name, job.instruction);

        let request = DispatchRequest::new(
            Source::Cron,
            CRON_SESSION_KEY,
            Sender::new(CRON_SESSION_KEY),
            instruction,
        )
        .with_priority(SCHEDULED_PRIORITY)
        .with_callbacks(DispatchCallbacks::default());

        let result = self.adapter.handle_request(request).await;

        if let Err(e) = &result {
            (self.on_error)(e, "cron");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedAgent;
    use crate::config::DispatcherConfig;
    use crate::dispatch::{Dispatcher, NoopHooks, Source};
    use crate::scheduler::cron::Schedule;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    #[tokio::test]
    async fn heartbeat_callback_formats_instruction_and_elevates_priority() {
        let seen_priority = Arc::new(StdMutex::new(0u8));
        struct CaptureHooks(Arc<StdMutex<u8>>);
        impl crate::dispatch::DispatchHooks for CaptureHooks {
            fn on_enqueue(&self, request: &crate::dispatch::DispatchRequest) {
                *self.0.lock().unwrap() = request.priority();
            }
        }

        let agent = Arc::new(ScriptedAgent::new(vec![Ok(MessageResponse::ok("Found 3 commits"))]));
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig::default(),
            agent,
            Arc::new(CaptureHooks(Arc::clone(&seen_priority))),
        ));
        let adapter = Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Heartbeat));
        let on_error = Arc::new(|_: &GatewayError, _: &str| {});
        let callback = HeartbeatDispatchCallback::new(adapter, on_error);

        let tasks = vec![HeartbeatTask {
            description: "Check repo".to_string(),
            completed: false,
            line: 0,
        }];
        let response = callback.on_tasks(&tasks, TriggerReason::Requested).await.unwrap();
        assert_eq!(response.text, "Found 3 commits");
        assert_eq!(*seen_priority.lock().unwrap(), SCHEDULED_PRIORITY);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn empty_tasks_return_immediately_without_dispatching() {
        struct PanicOnCallHooks;
        impl crate::dispatch::DispatchHooks for PanicOnCallHooks {
            fn on_enqueue(&self, _request: &crate::dispatch::DispatchRequest) {
                panic!("on_tasks dispatched a request for an empty task list");
            }
        }

        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig::default(),
            agent,
            Arc::new(PanicOnCallHooks),
        ));
        let adapter = Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Heartbeat));
        let on_error = Arc::new(|_: &GatewayError, _: &str| {});
        let callback = HeartbeatDispatchCallback::new(adapter, on_error);

        let response = callback.on_tasks(&[], TriggerReason::Exec).await.unwrap();
        assert_eq!(response.text, "");
        assert!(response.success);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn cron_callback_formats_instruction_verbatim() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(MessageResponse::ok("done"))]));
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), agent, Arc::new(NoopHooks)));
        let adapter = Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Cron));
        let on_error = Arc::new(|_: &GatewayError, _: &str| {});
        let callback = CronDispatchCallback::new(adapter, on_error);

        let job = CronJob {
            id: Uuid::new_v4(),
            name: "one-shot".to_string(),
            instruction: "Send reminder".to_string(),
            schedule: Schedule::Every { interval_ms: 1000 },
            enabled: true,
            created_at_ms: 0,
            last_run_at_ms: None,
            next_run_at_ms: None,
        };

        let response = callback.on_job(&job).await.unwrap();
        assert_eq!(response.text, "done");

        dispatcher.shutdown().await;
    }
}
