//! The opaque handler boundary the dispatcher calls into.
//!
//! The real LLM-backed implementation lives outside this crate; what's
//! here is the trait itself plus two deterministic test doubles used
//! throughout the dispatch and scheduler test suites.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dispatch::request::{DispatchRequest, MessageResponse};
use crate::error::GatewayError;

/// The single entry point every request passes through exactly once.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn handle(&self, request: &DispatchRequest) -> Result<MessageResponse, GatewayError>;
}

/// Echoes the request content back. Useful as a default/no-op agent and
/// in dispatcher ordering tests where the content of the reply doesn't
/// matter.
#[derive(Debug, Default)]
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn handle(&self, request: &DispatchRequest) -> Result<MessageResponse, GatewayError> {
        Ok(MessageResponse::ok(format!("echo: {}", request.content)))
    }
}

/// Replays a fixed sequence of responses, one per call, in order.
///
/// Used to assert exact handler-invocation order and to simulate handler
/// failures deterministically.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Result<MessageResponse, GatewayError>>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Result<MessageResponse, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn handle(&self, request: &DispatchRequest) -> Result<MessageResponse, GatewayError> {
        let mut script = self.script.lock().await;
        script.pop_front().unwrap_or_else(|| {
            Err(GatewayError::HandlerFailure {
                request_id: request.request_id.clone(),
                reason: "ScriptedAgent: script exhausted".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::request::{Sender, Source};

    #[tokio::test]
    async fn echo_agent_echoes_content() {
        let agent = EchoAgent;
        let req = DispatchRequest::new(Source::Chat, "s", Sender::new("u"), "hello");
        let resp = agent.handle(&req).await.unwrap();
        assert_eq!(resp.text, "echo: hello");
    }

    #[tokio::test]
    async fn scripted_agent_replays_in_order() {
        let agent = ScriptedAgent::new(vec![Ok(MessageResponse::ok("first")), Ok(MessageResponse::ok("second"))]);
        let req = DispatchRequest::new(Source::Chat, "s", Sender::new("u"), "hi");
        assert_eq!(agent.handle(&req).await.unwrap().text, "first");
        assert_eq!(agent.handle(&req).await.unwrap().text, "second");
        assert!(agent.handle(&req).await.is_err());
    }
}
