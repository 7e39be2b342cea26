//! Sifa: a dead man's switch
//!
//! Monitored targets (cron jobs, backups, services) report liveness by
//! calling a webhook. When a target stays silent longer than its `maxAge`,
//! sifa sends an alert, repeats it on the target's cron schedule, and lets
//! the recipient mute it through a signed link until the target reports
//! again.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use chrono::Utc;
//! use sifa::alerts::{evaluate, Action, Target};
//! use sifa::storage::{MemoryStore, StateStore};
//!
//! let store = MemoryStore::new();
//! let target = Target::new("nightly-backup", Duration::from_secs(86_400), "0 9 * * *");
//!
//! // The webhook handler records a liveness report
//! store.record_liveness(&target.id, Utc::now()).unwrap();
//!
//! let state = store.get_state(&target.id).unwrap();
//! let evaluation = evaluate(&target, &state, Utc::now());
//! assert_eq!(evaluation.action, Action::None);
//! ```

pub mod alerts;
pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

// Re-export commonly used types
pub use alerts::{Action, Scheduler, Target, TargetsFile};
pub use auth::{AccessToken, MuteTokens};
pub use config::{Config, ConfigError};
pub use storage::{StateStore, StoreError, TargetState};
