//! Dead man's switch alerting
//!
//! Evaluates every target's last liveness report against its `maxAge` and
//! sends overdue alerts through the configured notification channels.

pub mod config;
pub mod cron;
pub mod engine;
pub mod notifier;
pub mod scheduler;

pub use config::{Target, TargetsFile};
pub use engine::{evaluate, Action, Evaluation, StateDelta};
pub use notifier::{Dispatcher, Notification, Notifier, NotifyError};
pub use scheduler::{CycleError, CycleReport, Scheduler, SchedulerHandle};
