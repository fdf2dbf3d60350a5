//! The priority-queued, concurrency-bounded dispatcher.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use tokio::sync::{Mutex, Notify, oneshot};
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::config::DispatcherConfig;
use crate::dispatch::request::{DispatchRequest, MessageResponse};
use crate::error::GatewayError;

/// Hooks fired around every dispatched request. Registered once at
/// construction, not per-request, mirroring how a [`crate::channels::Channel`]
/// is wired once rather than per-message.
///
/// All methods have no-op defaults so an implementation only needs to
/// override the events it cares about.
pub trait DispatchHooks: Send + Sync {
    fn on_enqueue(&self, _request: &DispatchRequest) {}
    fn on_active(&self, _request: &DispatchRequest) {}
    fn on_complete(&self, _request: &DispatchRequest, _response: &MessageResponse) {}
    fn on_error(&self, _request: &DispatchRequest, _error: &GatewayError) {}
}

/// Default hooks implementation: does nothing.
#[derive(Debug, Default)]
pub struct NoopHooks;
impl DispatchHooks for NoopHooks {}

/// Instantaneous snapshot of dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub queued: usize,
    pub running: usize,
    pub concurrency: usize,
    pub is_paused: bool,
}

struct QueuedItem {
    request: DispatchRequest,
    priority: u8,
    seq: u64,
    reply_tx: oneshot::Sender<Result<MessageResponse, GatewayError>>,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedItem {}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority must compare greater,
        // and within equal priority the earlier sequence number (FIFO)
        // must compare greater so it's popped first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct State {
    queue: BinaryHeap<QueuedItem>,
    running: usize,
    paused: bool,
    shutting_down: bool,
    next_seq: u64,
}

struct Inner {
    state: Mutex<State>,
    wake: Notify,
    idle: Notify,
    concurrency: usize,
    request_timeout: Option<Duration>,
    agent: Arc<dyn Agent>,
    hooks: Arc<dyn DispatchHooks>,
}

/// A priority queue of [`DispatchRequest`]s with a bounded number of
/// concurrently running handler invocations.
///
/// Construction spawns a background task that drains the queue; dropping
/// the last `Dispatcher` handle does not stop that task cleanly — call
/// [`Dispatcher::shutdown`] first.
pub struct Dispatcher {
    inner: Arc<Inner>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, agent: Arc<dyn Agent>, hooks: Arc<dyn DispatchHooks>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                running: 0,
                paused: false,
                shutting_down: false,
                next_seq: 0,
            }),
            wake: Notify::new(),
            idle: Notify::new(),
            concurrency: config.concurrency.max(1),
            request_timeout: config.request_timeout,
            agent,
            hooks,
        });

        let drain_handle = tokio::spawn(drain_loop(Arc::clone(&inner)));

        Self {
            inner,
            drain_handle: Mutex::new(Some(drain_handle)),
        }
    }

    /// Enqueue a request and await its eventual response.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<MessageResponse, GatewayError> {
        self.inner.hooks.on_enqueue(&request);

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedItem {
                priority: request.priority(),
                seq,
                request,
                reply_tx,
            });
        }
        self.inner.wake.notify_waiters();

        reply_rx.await.unwrap_or_else(|_| {
            Err(GatewayError::HandlerFailure {
                request_id: "unknown".to_string(),
                reason: "dispatcher dropped the request before completion".to_string(),
            })
        })
    }

    pub async fn status(&self) -> DispatcherStatus {
        let state = self.inner.state.lock().await;
        DispatcherStatus {
            queued: state.queue.len(),
            running: state.running,
            concurrency: self.inner.concurrency,
            is_paused: state.paused,
        }
    }

    pub async fn pause(&self) {
        self.inner.state.lock().await.paused = true;
    }

    pub async fn resume(&self) {
        self.inner.state.lock().await.paused = false;
        self.inner.wake.notify_waiters();
    }

    /// Drop every queued (not yet running) request, failing each with
    /// [`GatewayError::CancelledByClear`]. Running requests are untouched.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped: Vec<QueuedItem> = state.queue.drain().collect();
        drop(state);

        for item in dropped {
            let err = GatewayError::CancelledByClear {
                request_id: item.request.request_id.clone(),
            };
            self.inner.hooks.on_error(&item.request, &err);
            let _ = item.reply_tx.send(Err(err));
        }
        self.maybe_notify_idle().await;
    }

    /// Resolves once the queue is empty and nothing is running.
    pub async fn on_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock().await;
                if state.queue.is_empty() && state.running == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// `pause()` + `clear()` + wait for idle, then stop the drain task.
    pub async fn shutdown(&self) {
        self.pause().await;
        self.clear().await;
        self.on_idle().await;

        {
            let mut state = self.inner.state.lock().await;
            state.shutting_down = true;
        }
        self.inner.wake.notify_waiters();

        if let Some(handle) = self.drain_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn maybe_notify_idle(&self) {
        let state = self.inner.state.lock().await;
        if state.queue.is_empty() && state.running == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}

async fn drain_loop(inner: Arc<Inner>) {
    loop {
        let item = loop {
            let notified = inner.wake.notified();
            {
                let mut state = inner.state.lock().await;
                if state.shutting_down {
                    return;
                }
                if !state.paused && state.running < inner.concurrency {
                    if let Some(item) = state.queue.pop() {
                        state.running += 1;
                        break item;
                    }
                }
            }
            notified.await;
        };

        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            run_one(&inner, item).await;
        });
    }
}

async fn run_one(inner: &Arc<Inner>, item: QueuedItem) {
    let QueuedItem {
        request, reply_tx, ..
    } = item;

    inner.hooks.on_active(&request);

    let handler_fut = invoke_handler(&inner.agent, &request);
    let outcome = match inner.request_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, handler_fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                request_id: request.request_id.clone(),
                elapsed: timeout,
            }),
        },
        None => handler_fut.await,
    };

    match &outcome {
        Ok(response) => inner.hooks.on_complete(&request, response),
        Err(error) => inner.hooks.on_error(&request, error),
    }
    let _ = reply_tx.send(outcome);

    let mut state = inner.state.lock().await;
    state.running -= 1;
    let idle = state.queue.is_empty() && state.running == 0;
    drop(state);

    inner.wake.notify_waiters();
    if idle {
        inner.idle.notify_waiters();
    }
}

/// Calls the agent and converts a panic into a `HandlerFailure` instead of
/// letting it unwind into the detached `drain_loop` task, where it would
/// skip the `running` decrement below and wedge the dispatcher forever.
async fn invoke_handler(agent: &Arc<dyn Agent>, request: &DispatchRequest) -> Result<MessageResponse, GatewayError> {
    match AssertUnwindSafe(agent.handle(request)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(GatewayError::HandlerFailure {
            request_id: request.request_id.clone(),
            reason: panic_message(&panic),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{EchoAgent, ScriptedAgent};
    use crate::dispatch::request::{Sender, Source};

    fn req(source: Source, content: &str) -> DispatchRequest {
        DispatchRequest::new(source, "s", Sender::new("u"), content)
    }

    #[tokio::test]
    async fn dispatches_to_handler_and_returns_response() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(EchoAgent), Arc::new(NoopHooks));
        let resp = dispatcher.dispatch(req(Source::Chat, "hi")).await.unwrap();
        assert_eq!(resp.text, "echo: hi");
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn higher_priority_runs_before_lower_when_queued_together() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(MessageResponse::ok("a")),
            Ok(MessageResponse::ok("b")),
            Ok(MessageResponse::ok("c")),
        ]));
        let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        struct OrderHooks(Arc<Mutex<Vec<u8>>>);
        impl DispatchHooks for OrderHooks {
            fn on_active(&self, request: &DispatchRequest) {
                let order = Arc::clone(&self.0);
                let priority = request.priority();
                tokio::spawn(async move {
                    order.lock().await.push(priority);
                });
            }
        }

        let mut config = DispatcherConfig::default();
        config.concurrency = 1;
        let dispatcher = Arc::new(Dispatcher::new(config, agent, Arc::new(OrderHooks(Arc::clone(&order)))));

        dispatcher.pause().await;
        let d1 = Arc::clone(&dispatcher);
        let d2 = Arc::clone(&dispatcher);
        let d3 = Arc::clone(&dispatcher);
        let f1 = tokio::spawn(async move { d1.dispatch(req(Source::Heartbeat, "low")).await });
        tokio::task::yield_now().await;
        let f2 = tokio::spawn(async move { d2.dispatch(req(Source::Chat, "high")).await });
        tokio::task::yield_now().await;
        let f3 = tokio::spawn(async move { d3.dispatch(req(Source::Cron, "mid")).await });
        tokio::task::yield_now().await;

        dispatcher.resume().await;

        let (r1, r2, r3) = tokio::join!(f1, f2, f3);
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();
        r3.unwrap().unwrap();

        dispatcher.shutdown().await;

        // Give the detached on_active tasks a moment to record order.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec![10, 5, 1]);
    }

    #[tokio::test]
    async fn clear_cancels_only_queued_requests() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(MessageResponse::ok("ran"))]));
        let mut config = DispatcherConfig::default();
        config.concurrency = 1;
        let dispatcher = Arc::new(Dispatcher::new(config, agent, Arc::new(NoopHooks)));

        dispatcher.pause().await;
        let d1 = Arc::clone(&dispatcher);
        let queued = tokio::spawn(async move { d1.dispatch(req(Source::Heartbeat, "queued")).await });
        tokio::task::yield_now().await;

        dispatcher.clear().await;
        let result = queued.await.unwrap();
        assert!(matches!(result, Err(GatewayError::CancelledByClear { .. })));

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_surfaces_as_timeout_error() {
        struct SlowAgent;
        #[async_trait::async_trait]
        impl Agent for SlowAgent {
            async fn handle(&self, _request: &DispatchRequest) -> Result<MessageResponse, GatewayError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(MessageResponse::ok("too late"))
            }
        }

        let mut config = DispatcherConfig::default();
        config.request_timeout = Some(Duration::from_millis(20));
        let dispatcher = Dispatcher::new(config, Arc::new(SlowAgent), Arc::new(NoopHooks));

        let result = dispatcher.dispatch(req(Source::Chat, "hi")).await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_handler_surfaces_as_handler_failure_and_does_not_wedge_the_queue() {
        struct PanicAgent;
        #[async_trait::async_trait]
        impl Agent for PanicAgent {
            async fn handle(&self, _request: &DispatchRequest) -> Result<MessageResponse, GatewayError> {
                panic!("boom");
            }
        }

        let mut config = DispatcherConfig::default();
        config.concurrency = 1;
        let dispatcher = Dispatcher::new(config, Arc::new(PanicAgent), Arc::new(NoopHooks));

        let result = dispatcher.dispatch(req(Source::Chat, "first")).await;
        assert!(matches!(result, Err(GatewayError::HandlerFailure { .. })));

        // A later request on the same single-concurrency lane must still run;
        // if the panic had skipped the `running` decrement this would hang.
        let result = dispatcher.dispatch(req(Source::Chat, "second")).await;
        assert!(matches!(result, Err(GatewayError::HandlerFailure { .. })));

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_leaves_dispatcher_idle_and_paused() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(EchoAgent), Arc::new(NoopHooks));
        dispatcher.dispatch(req(Source::Chat, "hi")).await.unwrap();
        dispatcher.shutdown().await;

        let status = dispatcher.status().await;
        assert_eq!(status.queued, 0);
        assert_eq!(status.running, 0);
        assert!(status.is_paused);
    }
}
