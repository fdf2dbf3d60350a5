//! Request and response types flowing through the dispatch core.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Origin of a dispatch request. Fixes the default priority unless the
/// request overrides it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Chat,
    Http,
    Terminal,
    Cron,
    Heartbeat,
}

impl Source {
    /// Default priority for this source. Higher runs first.
    pub fn default_priority(self) -> u8 {
        match self {
            Source::Chat | Source::Http | Source::Terminal => 10,
            Source::Cron => 5,
            Source::Heartbeat => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Chat => "chat",
            Source::Http => "http",
            Source::Terminal => "terminal",
            Source::Cron => "cron",
            Source::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of whoever sent a request.
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: String,
    pub display_name: Option<String>,
}

impl Sender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Optional delivery-time callbacks a caller can attach to a request.
///
/// These are invoked by the agent implementation while it is handling the
/// request; the dispatcher itself never calls them. They exist so a
/// streaming agent can push partial output to the original channel before
/// the final response is ready.
#[derive(Clone, Default)]
pub struct DispatchCallbacks {
    pub on_text_delta: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_reply: Option<Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>>,
}

impl fmt::Debug for DispatchCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchCallbacks")
            .field("on_text_delta", &self.on_text_delta.is_some())
            .field("on_reply", &self.on_reply.is_some())
            .finish()
    }
}

/// A normalized unit of work submitted to the [`crate::dispatch::Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Unique ID. Generated by the source adapter if not set explicitly.
    pub request_id: String,
    /// Opaque session key; the dispatcher never interprets this.
    pub session_key: String,
    /// Message text.
    pub content: String,
    pub sender: Sender,
    pub source: Source,
    /// Overrides `source.default_priority()` when set.
    pub priority_override: Option<u8>,
    pub callbacks: DispatchCallbacks,
}

impl DispatchRequest {
    pub fn new(source: Source, session_key: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            request_id: generate_request_id(),
            session_key: session_key.into(),
            content: content.into(),
            sender,
            source,
            priority_override: None,
            callbacks: DispatchCallbacks::default(),
        }
    }

    /// Effective priority: the override if set, else the source's default.
    pub fn priority(&self) -> u8 {
        self.priority_override.unwrap_or_else(|| self.source.default_priority())
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority_override = Some(priority);
        self
    }

    pub fn with_callbacks(mut self, callbacks: DispatchCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Generates IDs of the form `req_<millis>_<random>`.
pub fn generate_request_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("req_{millis}_{}", &suffix[..8])
}

/// Reply produced by the agent for a single request.
#[derive(Debug, Clone)]
pub struct MessageResponse {
    pub text: String,
    pub success: bool,
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_priorities_match_spec() {
        assert_eq!(Source::Chat.default_priority(), 10);
        assert_eq!(Source::Http.default_priority(), 10);
        assert_eq!(Source::Terminal.default_priority(), 10);
        assert_eq!(Source::Cron.default_priority(), 5);
        assert_eq!(Source::Heartbeat.default_priority(), 1);
    }

    #[test]
    fn priority_override_wins() {
        let req = DispatchRequest::new(Source::Heartbeat, "heartbeat", Sender::new("bot"), "hi")
            .with_priority(5);
        assert_eq!(req.priority(), 5);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req_"));
    }
}
