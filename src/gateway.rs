//! Gateway Assembly: wires channel adapters, the Dispatcher, the
//! schedulers, and the agent together, and orchestrates startup and
//! shutdown in the fixed order the spec requires.
//!
//! Startup: acquire lock -> build agent -> build Dispatcher -> build
//! source adapters -> start channels -> start HTTP -> start schedulers.
//! Shutdown reverses this: stop schedulers -> stop channels ->
//! `dispatcher.shutdown()` -> release lock.
//!
//! This ordering is fixed: channels must not be able to enqueue work
//! before the dispatcher exists, and the lock must outlive every other
//! resource so a crash mid-startup never leaves two gateways racing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::channels::{
    ChannelManager, HttpChannel, IncomingMessage, MessageStream, OutgoingResponse, TerminalChannel, WebhookServer,
    WebhookServerConfig,
};
use crate::config::TerminalConfig;
use crate::dispatch::{DispatchCallbacks, DispatchHooks, Dispatcher, NoopHooks, Sender, Source, SourceAdapter};
use crate::error::GatewayError;
use crate::lock::{self, GatewayLock};
use crate::scheduler::{CronDispatchCallback, CronScheduler, HeartbeatDispatchCallback, HeartbeatScheduler};
use crate::session;
use crate::settings::Settings;

/// The assembled, running gateway. Holds every long-lived handle needed
/// to shut the system down cleanly, in the reverse of startup order.
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    channels: Arc<ChannelManager>,
    webhook_server: Mutex<Option<WebhookServer>>,
    cron: CronScheduler,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    lock: Mutex<Option<GatewayLock>>,
}

impl Gateway {
    /// Run the full startup sequence and return a running gateway.
    pub async fn start(settings: Settings, agent: Arc<dyn Agent>) -> Result<Self, GatewayError> {
        let lock_path = settings.gateway.state_dir.join("gateway.lock");
        let gateway_lock = lock::acquire(&lock_path, Some(settings.http.port), settings.gateway.allow_multiple)?;
        tracing::info!(path = %lock_path.display(), "gateway lock acquired");

        let dispatcher = Arc::new(Dispatcher::new(
            settings.dispatcher.clone(),
            Arc::clone(&agent),
            Arc::new(NoopHooks) as Arc<dyn DispatchHooks>,
        ));

        let mut source_adapters: HashMap<String, Arc<SourceAdapter>> = HashMap::new();
        source_adapters.insert(
            "http".to_string(),
            Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Http)),
        );
        source_adapters.insert(
            "terminal".to_string(),
            Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Terminal)),
        );

        let http_channel = HttpChannel::new(settings.http.clone());
        let http_routes = http_channel.routes();

        let mut channel_manager = ChannelManager::new();
        channel_manager.add(Box::new(http_channel));
        channel_manager.add(Box::new(TerminalChannel::new(TerminalConfig::default())));
        let channel_manager = Arc::new(channel_manager);

        let stream = channel_manager.start_all().await.map_err(GatewayError::Delivery)?;
        let pump_handle = spawn_pump(Arc::clone(&channel_manager), source_adapters, stream);

        let addr: SocketAddr = format!("{}:{}", settings.http.host, settings.http.port)
            .parse()
            .map_err(|e| GatewayError::Channel(format!("invalid HTTP bind address: {e}")))?;
        let mut webhook_server = WebhookServer::new(WebhookServerConfig { addr });
        webhook_server.add_routes(http_routes);
        webhook_server.start().await.map_err(GatewayError::Delivery)?;

        if settings.heartbeat.enabled {
            let heartbeat_adapter = Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Heartbeat));
            let on_error: Arc<dyn Fn(&GatewayError, &str) + Send + Sync> =
                Arc::new(|err, source| tracing::error!(%err, source, "scheduled callback dispatch failed"));
            let callback = Arc::new(HeartbeatDispatchCallback::new(heartbeat_adapter, on_error));
            let heartbeat: Arc<HeartbeatScheduler> = Arc::new(HeartbeatScheduler::new(settings.heartbeat.clone(), callback));
            heartbeat.spawn();
        }

        let cron_adapter = Arc::new(SourceAdapter::new(Arc::clone(&dispatcher), Source::Cron));
        let on_error: Arc<dyn Fn(&GatewayError, &str) + Send + Sync> =
            Arc::new(|err, source| tracing::error!(%err, source, "scheduled callback dispatch failed"));
        let cron_callback = Arc::new(CronDispatchCallback::new(cron_adapter, on_error));
        let cron = CronScheduler::new(settings.cron.jobs_file.clone(), cron_callback);
        cron.initialize().await?;

        tracing::info!("gateway ready");

        Ok(Self {
            dispatcher,
            channels: channel_manager,
            webhook_server: Mutex::new(Some(webhook_server)),
            cron,
            pump_handle: Mutex::new(Some(pump_handle)),
            lock: Mutex::new(gateway_lock),
        })
    }

    /// A reference to the dispatcher, for status inspection by the CLI
    /// or tests driving a running gateway directly.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Stop schedulers, stop channels, drain the dispatcher, release the lock.
    pub async fn shutdown(self) {
        self.cron.shutdown().await;

        if let Some(handle) = self.pump_handle.lock().await.take() {
            handle.abort();
        }
        if let Err(e) = self.channels.shutdown_all().await {
            tracing::error!(error = %e, "error shutting down channels");
        }
        if let Some(mut server) = self.webhook_server.lock().await.take() {
            server.shutdown().await;
        }

        self.dispatcher.shutdown().await;

        if let Some(lock) = self.lock.lock().await.take() {
            if let Err(e) = lock.release() {
                tracing::error!(error = %e, "failed to release gateway lock");
            }
        }
        tracing::info!("gateway shut down");
    }
}

/// Drain the merged channel message stream, dispatching each message
/// through the adapter bound to its originating channel and routing the
/// response back. Each message is handled on its own task so a slow
/// handler on one channel never blocks delivery to another.
fn spawn_pump(
    channels: Arc<ChannelManager>,
    source_adapters: HashMap<String, Arc<SourceAdapter>>,
    mut stream: MessageStream,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let channels = Arc::clone(&channels);
            let adapter = source_adapters.get(&msg.channel).cloned();
            tokio::spawn(handle_incoming(channels, adapter, msg));
        }
    })
}

async fn handle_incoming(channels: Arc<ChannelManager>, adapter: Option<Arc<SourceAdapter>>, msg: IncomingMessage) {
    let Some(adapter) = adapter else {
        tracing::warn!(channel = %msg.channel, "message from unregistered channel, dropping");
        return;
    };

    let session_key = session::one_to_one(&msg.channel, &msg.user_id);
    let mut sender = Sender::new(msg.user_id.clone());
    if let Some(name) = &msg.user_name {
        sender = sender.with_display_name(name.clone());
    }

    let result = adapter
        .handle(session_key, sender, msg.content.clone(), DispatchCallbacks::default())
        .await;

    let response = match result {
        Ok(response) if response.success => OutgoingResponse::text(response.text),
        Ok(response) => OutgoingResponse::text(response.error.unwrap_or(response.text)),
        Err(e) => OutgoingResponse::text(e.to_string()),
    };

    if let Err(e) = channels.respond(&msg, response).await {
        tracing::warn!(error = %e, "failed to deliver response to channel");
    }
}
