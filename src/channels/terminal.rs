//! Interactive terminal (REPL) channel.
//!
//! Reads lines via `rustyline` on a blocking task (the crate is
//! synchronous) and forwards each as an [`IncomingMessage`]; responses are
//! printed directly to stdout.

use async_trait::async_trait;
use crossterm::style::Stylize;
use rustyline::DefaultEditor;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::config::TerminalConfig;
use crate::error::ChannelError;

pub struct TerminalChannel {
    config: TerminalConfig,
    reader_handle: RwLock<Option<std::thread::JoinHandle<()>>>,
}

impl TerminalChannel {
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            config,
            reader_handle: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Channel for TerminalChannel {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let user_id = self.config.user_id.clone();
        let history_path = self.config.history_path.clone();

        let handle = std::thread::spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start terminal editor");
                    return;
                }
            };
            if let Some(path) = &history_path {
                let _ = editor.load_history(path);
            }

            loop {
                match editor.readline("> ") {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let _ = editor.add_history_entry(line.as_str());
                        if let Some(path) = &history_path {
                            let _ = editor.save_history(path);
                        }
                        let msg = IncomingMessage::new("terminal", &user_id, line);
                        if tx.blocking_send(msg).is_err() {
                            break;
                        }
                    }
                    Err(rustyline::error::ReadlineError::Eof)
                    | Err(rustyline::error::ReadlineError::Interrupted) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "terminal readline error");
                        break;
                    }
                }
            }
        });

        *self.reader_handle.write().await = Some(handle);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn respond(&self, _msg: &IncomingMessage, response: OutgoingResponse) -> Result<(), ChannelError> {
        println!("{}", response.content.as_str().green());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        // The blocking reader thread exits only on EOF/interrupt from
        // stdin; there's no portable way to wake `readline()` early, so
        // shutdown just detaches rather than joining.
        let _ = self.reader_handle.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_channel_reports_healthy_before_start() {
        let channel = TerminalChannel::new(TerminalConfig::default());
        assert!(channel.health_check().await.is_ok());
    }
}
