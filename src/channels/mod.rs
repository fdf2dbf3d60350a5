//! Channel adapters: the concrete message sources this gateway ships
//! with (HTTP webhook, interactive terminal) plus the trait and types
//! every channel, including future chat-platform clients, presents to
//! [`crate::gateway::Gateway`].

mod channel;
mod http;
mod manager;
mod terminal;
mod webhook_server;

pub use channel::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
pub use http::HttpChannel;
pub use manager::ChannelManager;
pub use terminal::TerminalChannel;
pub use webhook_server::{WebhookServer, WebhookServerConfig};
