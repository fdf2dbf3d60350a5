//! Wraps a [`Dispatcher`] as the per-source message handler channels call.

use std::sync::Arc;

use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::request::{DispatchCallbacks, DispatchRequest, MessageResponse, Sender, Source};
use crate::error::GatewayError;

/// Binds a fixed [`Source`] to a shared [`Dispatcher`].
///
/// This is the only place the source-to-priority mapping is applied:
/// every message entering through this adapter gets `source`'s default
/// priority unless the caller overrides it explicitly.
pub struct SourceAdapter {
    dispatcher: Arc<Dispatcher>,
    source: Source,
}

impl SourceAdapter {
    pub fn new(dispatcher: Arc<Dispatcher>, source: Source) -> Self {
        Self { dispatcher, source }
    }

    /// Dispatch one message, forwarding the handler's response (or error)
    /// back to the caller unchanged.
    pub async fn handle(
        &self,
        session_key: impl Into<String>,
        sender: Sender,
        content: impl Into<String>,
        callbacks: DispatchCallbacks,
    ) -> Result<MessageResponse, GatewayError> {
        let request = DispatchRequest::new(self.source, session_key, sender, content).with_callbacks(callbacks);
        self.dispatcher.dispatch(request).await
    }

    /// Dispatch an already-constructed request, overriding its source to
    /// the one this adapter is bound to.
    pub async fn handle_request(&self, mut request: DispatchRequest) -> Result<MessageResponse, GatewayError> {
        request.source = self.source;
        self.dispatcher.dispatch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EchoAgent;
    use crate::config::DispatcherConfig;
    use crate::dispatch::dispatcher::NoopHooks;

    #[tokio::test]
    async fn adapter_tags_requests_with_its_source() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(EchoAgent),
            Arc::new(NoopHooks),
        ));
        let adapter = SourceAdapter::new(Arc::clone(&dispatcher), Source::Terminal);

        let response = adapter
            .handle("main", Sender::new("me"), "hello", DispatchCallbacks::default())
            .await
            .unwrap();
        assert_eq!(response.text, "echo: hello");

        dispatcher.shutdown().await;
    }
}
