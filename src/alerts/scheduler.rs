//! Periodic evaluation of every target

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::config::{Target, TargetsFile};
use super::engine::{evaluate, humanize_ago, Action, Evaluation, Reason};
use super::notifier::{Notification, Notifier};
use crate::auth::MuteTokens;
use crate::storage::StateStore;

/// Drives the alert engine over all configured targets
pub struct Scheduler {
    targets: Arc<TargetsFile>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    mute_tokens: MuteTokens,
    /// Public base URL for mute links; no link is included when unset
    public_url: Option<String>,
    last_cycle: RwLock<Option<CycleReport>>,
}

/// Summary of one evaluation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub evaluated: usize,
    pub skipped: usize,
    pub fired: usize,
    pub cleared: usize,
    pub errors: Vec<CycleError>,
}

/// A failure confined to one target within a cycle
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleError {
    #[error("Target {target_id}: storage error: {message}")]
    Store { target_id: String, message: String },

    #[error("Target {target_id}: invalid alert schedule: {message}")]
    InvalidSchedule { target_id: String, message: String },

    #[error("Target {target_id}: failed to send alert: {message}")]
    Dispatch { target_id: String, message: String },
}

impl Scheduler {
    pub fn new(
        targets: Arc<TargetsFile>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        mute_tokens: MuteTokens,
    ) -> Self {
        Self {
            targets,
            store,
            notifier,
            mute_tokens,
            public_url: None,
            last_cycle: RwLock::new(None),
        }
    }

    pub fn with_public_url(mut self, url: Option<String>) -> Self {
        self.public_url = url;
        self
    }

    /// Report of the most recently completed cycle
    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().clone()
    }

    /// Start the background loop: one cycle immediately, then one per
    /// `check_interval`.
    pub fn start(self: Arc<Self>, check_interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            tracing::info!("Scheduler started with interval {:?}", check_interval);

            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // A running cycle is never interrupted; shutdown is only
                // observed between cycles.
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_cycle(Utc::now()).await;
                    }
                }
            }

            tracing::info!("Scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, task }
    }

    /// Evaluate every target once.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        tracing::info!(targets = self.targets.targets.len(), "Running alert check");

        let mut report = CycleReport {
            started_at: Some(now),
            ..Default::default()
        };

        for target in &self.targets.targets {
            if let Err(e) = self.check_target(target, now, &mut report).await {
                tracing::error!(error = %e, "Alert check failed");
                report.errors.push(e);
            }
        }

        tracing::info!(
            evaluated = report.evaluated,
            skipped = report.skipped,
            fired = report.fired,
            cleared = report.cleared,
            errors = report.errors.len(),
            "Alert check finished"
        );

        *self.last_cycle.write() = Some(report.clone());
        report
    }

    async fn check_target(
        &self,
        target: &Target,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        // Decide and apply in one store transaction so a concurrent liveness
        // report is either fully before or fully after this evaluation. The
        // transaction may fsync, so it runs on the blocking pool.
        let store = Arc::clone(&self.store);
        let evaluated = target.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut outcome: Option<Evaluation> = None;
            let updated = store.update(&evaluated.id, &mut |state| {
                let evaluation = evaluate(&evaluated, state, now);
                evaluation.delta.apply(state);
                outcome = Some(evaluation);
            });
            updated.map(|_| outcome)
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|result| result.map_err(|e| e.to_string()))
        .map_err(|message| CycleError::Store {
            target_id: target.id.clone(),
            message,
        })?;

        let Some(evaluation) = outcome else {
            return Ok(());
        };

        log_evaluation(target, &evaluation);
        report.evaluated += 1;

        match evaluation.action {
            Action::Skip => report.skipped += 1,
            Action::ClearAlert => report.cleared += 1,
            _ => {}
        }

        if let Reason::InvalidSchedule(message) = &evaluation.reason {
            return Err(CycleError::InvalidSchedule {
                target_id: target.id.clone(),
                message: message.clone(),
            });
        }

        if !evaluation.action.fires() {
            return Ok(());
        }

        report.fired += 1;
        let notification = self.build_notification(target, &evaluation);

        // The alert stays recorded even if delivery fails
        self.notifier
            .send(&notification)
            .await
            .map_err(|e| CycleError::Dispatch {
                target_id: target.id.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(
            target_id = %target.id,
            action = evaluation.action.as_str(),
            "Alert sent"
        );

        Ok(())
    }

    fn build_notification(&self, target: &Target, evaluation: &Evaluation) -> Notification {
        let since = evaluation
            .elapsed
            .map(humanize_ago)
            .unwrap_or_else(|| "an unknown time".to_string());

        let mut message = format!("Target {} has not acted since {}.", target.id, since);
        if let Some(base) = &self.public_url {
            message.push_str(&format!(
                "\n\nTo mute these alerts until the target acts again, open:\n{}",
                self.mute_tokens.mute_url(base, &target.id)
            ));
        }

        Notification {
            target_id: target.id.clone(),
            title: format!("Alert: Target {} is overdue", target.id),
            message,
            recipient: target.email.clone(),
        }
    }
}

fn log_evaluation(target: &Target, evaluation: &Evaluation) {
    let id = &target.id;
    let elapsed_secs = evaluation.elapsed.map(|e| e.num_seconds()).unwrap_or_default();

    match &evaluation.reason {
        Reason::NotYetObserved => tracing::info!(target_id = %id, "Not acted upon yet"),
        Reason::Healthy => tracing::debug!(
            target_id = %id,
            elapsed_secs,
            max_age = target.max_age,
            "Target healthy"
        ),
        Reason::Recovered => tracing::info!(
            target_id = %id,
            elapsed_secs,
            "Target back to normal, clearing alert state"
        ),
        Reason::Muted => tracing::info!(
            target_id = %id,
            elapsed_secs,
            "Target overdue but muted, skipping alert"
        ),
        Reason::FirstOverdue => tracing::warn!(
            target_id = %id,
            elapsed_secs,
            "Target overdue, sending first alert"
        ),
        Reason::ScheduleNotDue => tracing::info!(
            target_id = %id,
            elapsed_secs,
            schedule = %target.alert_schedule,
            "Target overdue, alert schedule not due"
        ),
        Reason::WithinRealertWindow { since_last_alert } => tracing::info!(
            target_id = %id,
            last_alert_mins = since_last_alert.num_minutes(),
            "Alert schedule due but already alerted recently, skipping"
        ),
        Reason::ScheduleDue { since_last_alert } => tracing::warn!(
            target_id = %id,
            elapsed_secs,
            last_alert_mins = since_last_alert.num_minutes(),
            "Target overdue and alert schedule due, sending alert"
        ),
        Reason::InvalidSchedule(e) => tracing::warn!(
            target_id = %id,
            schedule = %target.alert_schedule,
            error = %e,
            "Cannot check alert schedule"
        ),
    }
}

/// Handle to a running scheduler loop
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling new cycles and wait for the in-flight one to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Scheduler task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
