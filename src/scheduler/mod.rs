//! The scheduled-dispatch layer: heartbeat and cron triggers, and the
//! callback builder that wires both into the [`crate::dispatch::Dispatcher`].

pub mod callback;
pub mod cron;
pub mod heartbeat;

pub use callback::{CronDispatchCallback, HeartbeatDispatchCallback};
pub use cron::{CronCallback, CronJob, CronScheduler, CronStatus, NewCronJob, Schedule};
pub use heartbeat::{
    HeartbeatCallback, HeartbeatOutcome, HeartbeatScheduler, HeartbeatTask, SkipReason, TriggerReason,
    parse_task_file, strip_heartbeat_ok,
};
