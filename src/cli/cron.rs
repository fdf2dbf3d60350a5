//! Cron job inspection/mutation CLI commands.
//!
//! These commands load the persisted job map directly (no running
//! dispatcher or callback wiring needed) so operators can inspect or
//! edit scheduled tasks without starting the full gateway.

use std::sync::Arc;

use clap::Subcommand;
use uuid::Uuid;

use crate::dispatch::MessageResponse;
use crate::error::GatewayError;
use crate::scheduler::cron::{CronCallback, CronJob, CronScheduler, NewCronJob, Schedule};
use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum CronCommand {
    /// List all persisted cron jobs.
    List,

    /// Add a new job.
    Add {
        /// Human-readable job name.
        name: String,
        /// Free-form instruction dispatched to the agent when the job fires.
        instruction: String,
        /// Fire once at this many milliseconds from now.
        #[arg(long, conflicts_with_all = ["every_ms", "expr"])]
        at_ms_from_now: Option<i64>,
        /// Fire every this many milliseconds.
        #[arg(long, conflicts_with_all = ["at_ms_from_now", "expr"])]
        every_ms: Option<i64>,
        /// Fire on a restricted five-field cron expression (`M H * * *`).
        #[arg(long, conflicts_with_all = ["at_ms_from_now", "every_ms"])]
        expr: Option<String>,
    },

    /// Remove a job by id.
    Remove {
        /// Job id (UUID).
        id: Uuid,
    },

    /// Fire a job immediately, without waiting for its schedule.
    Run {
        /// Job id (UUID).
        id: Uuid,
    },
}

/// A callback that just logs instead of dispatching; the CLI surface
/// never has a live Dispatcher to dispatch through.
struct LoggingCallback;

#[async_trait::async_trait]
impl CronCallback for LoggingCallback {
    async fn on_job(&self, job: &CronJob) -> Result<MessageResponse, GatewayError> {
        println!("[CRON TASK: {}] {}", job.name, job.instruction);
        Ok(MessageResponse::ok(""))
    }
}

pub async fn run_cron_command(cmd: CronCommand) -> anyhow::Result<()> {
    let settings = Settings::load();
    let scheduler = CronScheduler::new(settings.cron.jobs_file.clone(), Arc::new(LoggingCallback));
    scheduler.initialize().await?;

    match cmd {
        CronCommand::List => list(&scheduler).await,
        CronCommand::Add {
            name,
            instruction,
            at_ms_from_now,
            every_ms,
            expr,
        } => add(&scheduler, name, instruction, at_ms_from_now, every_ms, expr).await,
        CronCommand::Remove { id } => remove(&scheduler, id).await,
        CronCommand::Run { id } => run_now(&scheduler, id).await,
    }
}

async fn list(scheduler: &CronScheduler) -> anyhow::Result<()> {
    let jobs = scheduler.list_jobs().await;
    if jobs.is_empty() {
        println!("No cron jobs.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:<24}  enabled={}  next_run_at_ms={:?}  last_run_at_ms={:?}",
            job.id, job.name, job.enabled, job.next_run_at_ms, job.last_run_at_ms
        );
    }
    Ok(())
}

async fn add(
    scheduler: &CronScheduler,
    name: String,
    instruction: String,
    at_ms_from_now: Option<i64>,
    every_ms: Option<i64>,
    expr: Option<String>,
) -> anyhow::Result<()> {
    let schedule = if let Some(delta) = at_ms_from_now {
        Schedule::At {
            at_ms: chrono::Utc::now().timestamp_millis() + delta,
        }
    } else if let Some(interval_ms) = every_ms {
        Schedule::Every { interval_ms }
    } else if let Some(expr) = expr {
        Schedule::Expr { expr }
    } else {
        anyhow::bail!("one of --at-ms-from-now, --every-ms, or --expr is required");
    };

    let job = scheduler
        .add_job(NewCronJob {
            name,
            instruction,
            schedule,
        })
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("Added job {} ({})", job.id, job.name);
    Ok(())
}

async fn remove(scheduler: &CronScheduler, id: Uuid) -> anyhow::Result<()> {
    scheduler.remove_job(id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Removed job {id}");
    Ok(())
}

async fn run_now(scheduler: &CronScheduler, id: Uuid) -> anyhow::Result<()> {
    scheduler.run_job(id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Triggered job {id}");
    // run_job is fire-and-forget; give it a moment to execute before the
    // process exits so the LoggingCallback's output is actually seen.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(())
}
