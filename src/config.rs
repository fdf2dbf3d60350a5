//! Per-component configuration structs.
//!
//! These are the leaf values assembled into [`crate::settings::Settings`].
//! Keeping them as plain structs (rather than folding everything into one
//! flat bag of fields) lets each component accept just the slice it needs.

use secrecy::SecretString;

/// Configuration for the HTTP webhook channel.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind host, e.g. "127.0.0.1" or "0.0.0.0".
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Shared secret required on every webhook POST. `start()` refuses to
    /// run without one.
    pub webhook_secret: Option<SecretString>,
    /// Fixed sender identity attributed to all HTTP-originated messages.
    pub user_id: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            webhook_secret: None,
            user_id: "http".to_string(),
        }
    }
}

/// Configuration for the interactive terminal channel.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Sender identity attributed to terminal-originated messages.
    pub user_id: String,
    /// Path to the rustyline history file, if persistent history is wanted.
    pub history_path: Option<std::path::PathBuf>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            user_id: "terminal".to_string(),
            history_path: None,
        }
    }
}

/// Configuration for the priority dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of concurrently running handler invocations.
    pub concurrency: usize,
    /// Optional per-request deadline. `None` means no timeout.
    pub request_timeout: Option<std::time::Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            request_timeout: None,
        }
    }
}

/// Configuration for the heartbeat scheduler.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between timer-driven triggers.
    pub interval: std::time::Duration,
    /// Whether the heartbeat loop runs at all.
    pub enabled: bool,
    /// Path to the checkbox task file.
    pub task_file: std::path::PathBuf,
    /// Sliding window size for duplicate-result suppression.
    pub duplicate_window: usize,
    /// How long a duplicate-suppression entry remains eligible for matching.
    pub duplicate_ttl: std::time::Duration,
    /// Coalescing window for timer-triggered bursts.
    pub coalesce_window: std::time::Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(30 * 60),
            enabled: true,
            task_file: std::path::PathBuf::from("HEARTBEAT.md"),
            duplicate_window: 5,
            duplicate_ttl: std::time::Duration::from_secs(5 * 60),
            coalesce_window: std::time::Duration::from_millis(10),
        }
    }
}

/// Configuration for the cron scheduler.
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Path to the JSON job persistence file.
    pub jobs_file: std::path::PathBuf,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            jobs_file: std::path::PathBuf::from("cron_jobs.json"),
        }
    }
}

/// Configuration for the gateway single-instance lock.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory holding the lock file and other runtime state.
    pub state_dir: std::path::PathBuf,
    /// Skip acquiring the lock entirely (for tests and multi-instance dev).
    pub allow_multiple: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            allow_multiple: false,
        }
    }
}

fn default_state_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("deca-gateway")
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_tilde(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_replaces_home() {
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde("~/state");
            assert_eq!(expanded, home.join("state"));
        }
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths_alone() {
        let expanded = expand_tilde("/var/lib/deca");
        assert_eq!(expanded, std::path::PathBuf::from("/var/lib/deca"));
    }
}
