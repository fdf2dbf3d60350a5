//! Layered configuration: built-in defaults, overridden by environment
//! variables, with a thin string-keyed get/set/reset surface for the CLI.
//!
//! Settings are loaded once at startup (see [`crate::gateway::Gateway`])
//! and handed to each component by reference. There is no hot reload.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::{CronConfig, DispatcherConfig, GatewayConfig, HeartbeatConfig, HttpConfig};

/// Agent-facing identity settings.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub name: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "deca-gateway".to_string(),
        }
    }
}

/// The full set of gateway-tunable settings.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub dispatcher: DispatcherConfig,
    pub heartbeat: HeartbeatConfig,
    pub cron: CronConfig,
    pub http: HttpConfig,
    pub gateway: GatewayConfig,
}

impl Settings {
    /// Load settings: defaults, then environment variable overrides.
    ///
    /// A `.env` file in the current directory is read first (via `dotenvy`)
    /// so local development doesn't require exporting every variable by hand.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let mut settings = Self::default();

        if let Ok(dir) = std::env::var("DECA_STATE_DIR") {
            settings.gateway.state_dir = crate::config::expand_tilde(&dir);
        }
        if let Ok(provider) = std::env::var("DECA_PROVIDER") {
            tracing::debug!(provider = %provider, "DECA_PROVIDER set; forwarded to agent construction");
        }
        if let Ok(port) = std::env::var("HTTP_PORT") {
            if let Ok(port) = port.parse() {
                settings.http.port = port;
            } else {
                tracing::warn!(value = %port, "ignoring malformed HTTP_PORT");
            }
        }
        if let Ok(secret) = std::env::var("HTTP_WEBHOOK_SECRET") {
            settings.http.webhook_secret = Some(SecretString::from(secret));
        }
        if std::env::var("DECA_ALLOW_MULTI_GATEWAY").as_deref() == Ok("1") {
            settings.gateway.allow_multiple = true;
        }

        settings.cron.jobs_file = settings.gateway.state_dir.join("cron_jobs.json");
        if let Ok(path) = std::env::var("DECA_HEARTBEAT_FILE") {
            settings.heartbeat.task_file = crate::config::expand_tilde(&path);
        }

        settings
    }

    /// Path the settings would be persisted to, if `save()` is called.
    pub fn default_path() -> PathBuf {
        GatewayConfig::default().state_dir.join("settings.json")
    }

    /// Persist the mutable subset of settings (those reachable via `set`)
    /// to [`Self::default_path`].
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let value = serde_json::json!({
            "agent": { "name": self.agent.name },
            "dispatcher": {
                "concurrency": self.dispatcher.concurrency,
                "request_timeout_secs": self.dispatcher.request_timeout.map(|d| d.as_secs()),
            },
            "heartbeat": {
                "enabled": self.heartbeat.enabled,
                "interval_secs": self.heartbeat.interval.as_secs(),
            },
            "http": { "host": self.http.host, "port": self.http.port },
        });
        std::fs::write(path, serde_json::to_vec_pretty(&value)?)
    }

    /// Flatten settings into dotted-path `(key, value)` pairs for display.
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("agent.name".to_string(), self.agent.name.clone()),
            (
                "dispatcher.concurrency".to_string(),
                self.dispatcher.concurrency.to_string(),
            ),
            (
                "dispatcher.request_timeout_secs".to_string(),
                self.dispatcher
                    .request_timeout
                    .map(|d| d.as_secs().to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
            (
                "heartbeat.enabled".to_string(),
                self.heartbeat.enabled.to_string(),
            ),
            (
                "heartbeat.interval_secs".to_string(),
                self.heartbeat.interval.as_secs().to_string(),
            ),
            (
                "heartbeat.task_file".to_string(),
                self.heartbeat.task_file.display().to_string(),
            ),
            (
                "cron.jobs_file".to_string(),
                self.cron.jobs_file.display().to_string(),
            ),
            ("http.host".to_string(), self.http.host.clone()),
            ("http.port".to_string(), self.http.port.to_string()),
            (
                "gateway.state_dir".to_string(),
                self.gateway.state_dir.display().to_string(),
            ),
            (
                "gateway.allow_multiple".to_string(),
                self.gateway.allow_multiple.to_string(),
            ),
        ]
    }

    /// Look up a single dotted-path value.
    pub fn get(&self, path: &str) -> Option<String> {
        self.list().into_iter().find(|(k, _)| k == path).map(|(_, v)| v)
    }

    /// Set a single dotted-path value, parsing it against that field's type.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), String> {
        match path {
            "agent.name" => self.agent.name = value.to_string(),
            "dispatcher.concurrency" => {
                self.dispatcher.concurrency = value
                    .parse()
                    .map_err(|_| format!("'{value}' is not a valid concurrency"))?;
            }
            "dispatcher.request_timeout_secs" => {
                self.dispatcher.request_timeout = if value == "none" {
                    None
                } else {
                    Some(Duration::from_secs(
                        value
                            .parse()
                            .map_err(|_| format!("'{value}' is not a valid timeout"))?,
                    ))
                };
            }
            "heartbeat.enabled" => {
                self.heartbeat.enabled = value
                    .parse()
                    .map_err(|_| format!("'{value}' is not a valid bool"))?;
            }
            "heartbeat.interval_secs" => {
                self.heartbeat.interval = Duration::from_secs(
                    value
                        .parse()
                        .map_err(|_| format!("'{value}' is not a valid interval"))?,
                );
            }
            "heartbeat.task_file" => self.heartbeat.task_file = PathBuf::from(value),
            "cron.jobs_file" => self.cron.jobs_file = PathBuf::from(value),
            "http.host" => self.http.host = value.to_string(),
            "http.port" => {
                self.http.port = value
                    .parse()
                    .map_err(|_| format!("'{value}' is not a valid port"))?;
            }
            "gateway.state_dir" => self.gateway.state_dir = PathBuf::from(value),
            "gateway.allow_multiple" => {
                self.gateway.allow_multiple = value
                    .parse()
                    .map_err(|_| format!("'{value}' is not a valid bool"))?;
            }
            other => return Err(format!("unknown setting: {other}")),
        }
        Ok(())
    }

    /// Reset a single dotted-path value to its default.
    pub fn reset(&mut self, path: &str) -> Result<(), String> {
        let default = Self::default();
        let value = default.get(path).ok_or_else(|| format!("unknown setting: {path}"))?;
        self.set(path, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_list_is_non_empty() {
        let settings = Settings::default();
        assert!(!settings.list().is_empty());
    }

    #[test]
    fn get_set_reset_round_trip() {
        let mut settings = Settings::default();

        settings.set("agent.name", "testbot").unwrap();
        assert_eq!(settings.agent.name, "testbot");

        settings.reset("agent.name").unwrap();
        assert_eq!(settings.agent.name, "deca-gateway");
    }

    #[test]
    fn set_rejects_unknown_path() {
        let mut settings = Settings::default();
        assert!(settings.set("nope.nope", "x").is_err());
    }

    #[test]
    fn set_rejects_malformed_value() {
        let mut settings = Settings::default();
        assert!(settings.set("dispatcher.concurrency", "not-a-number").is_err());
    }
}
