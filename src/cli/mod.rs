//! CLI surface: `clap`-derived subcommands for running the gateway and
//! for inspecting/mutating cron jobs and settings without starting it.

pub mod config;
pub mod cron;
pub mod lock;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "deca-gateway", version, about = "Multi-channel conversational agent gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway: acquire the lock, wire channels and schedulers,
    /// and run until a shutdown signal arrives.
    Run,

    /// Manage persisted cron jobs.
    Cron {
        #[command(subcommand)]
        command: cron::CronCommand,
    },

    /// Manage gateway settings.
    Config {
        #[command(subcommand)]
        command: config::ConfigCommand,
    },

    /// Inspect the single-instance gateway lock.
    Lock {
        #[command(subcommand)]
        command: lock::LockCommand,
    },
}
