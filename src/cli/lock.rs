//! Gateway lock inspection CLI command.

use clap::Subcommand;

use crate::lock;
use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum LockCommand {
    /// Report whether a gateway is currently running.
    Status,
}

pub fn run_lock_command(cmd: LockCommand) -> anyhow::Result<()> {
    match cmd {
        LockCommand::Status => status(),
    }
}

fn status() -> anyhow::Result<()> {
    let settings = Settings::load();
    let path = settings.gateway.state_dir.join("gateway.lock");

    match lock::check_gateway_running(&path) {
        Some(record) => {
            println!("running: pid={} created_at={}", record.pid, record.created_at);
            if let Some(port) = record.http_port {
                println!("http_port={port}");
            }
        }
        None => println!("not running"),
    }
    Ok(())
}
