//! Alert state machine
//!
//! [`evaluate`] is a pure function of a target's configuration, its stored
//! state and the current time. It decides whether to alert and how the
//! state must change; it never performs I/O. The scheduler applies the
//! returned [`StateDelta`] inside a store transaction and dispatches the
//! notification afterwards.

use chrono::{DateTime, Duration, Utc};

use super::config::Target;
use super::cron;
use crate::storage::TargetState;

/// Minimum time between two alerts for the same target, regardless of how
/// often the alert schedule matches.
pub const MIN_REALERT_INTERVAL_SECS: i64 = 3600;

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do
    None,
    /// First alert of an overdue period
    FireFirstAlert,
    /// Repeat alert, schedule due and re-alert window elapsed
    FireScheduledAlert,
    /// Target is healthy again, forget the outstanding alert
    ClearAlert,
    /// Target never reported, not evaluated
    Skip,
}

impl Action {
    pub fn fires(&self) -> bool {
        matches!(self, Action::FireFirstAlert | Action::FireScheduledAlert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::FireFirstAlert => "fire_first_alert",
            Action::FireScheduledAlert => "fire_scheduled_alert",
            Action::ClearAlert => "clear_alert",
            Action::Skip => "skip",
        }
    }
}

/// State mutation implied by an [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateDelta {
    Unchanged,
    SetLastAlerted(DateTime<Utc>),
    ClearLastAlerted,
}

impl StateDelta {
    pub fn apply(&self, state: &mut TargetState) {
        match self {
            StateDelta::Unchanged => {}
            StateDelta::SetLastAlerted(at) => state.last_alerted = Some(*at),
            StateDelta::ClearLastAlerted => state.last_alerted = None,
        }
    }
}

/// Why an evaluation ended the way it did, for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    NotYetObserved,
    Healthy,
    Recovered,
    Muted,
    FirstOverdue,
    ScheduleNotDue,
    WithinRealertWindow { since_last_alert: Duration },
    ScheduleDue { since_last_alert: Duration },
    InvalidSchedule(String),
}

/// Result of [`evaluate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub action: Action,
    pub delta: StateDelta,
    pub reason: Reason,
    /// Time since the last liveness report, when known
    pub elapsed: Option<Duration>,
}

impl Evaluation {
    fn new(action: Action, delta: StateDelta, reason: Reason, elapsed: Option<Duration>) -> Self {
        Self {
            action,
            delta,
            reason,
            elapsed,
        }
    }
}

/// Decide what to do with a target at `now`.
pub fn evaluate(target: &Target, state: &TargetState, now: DateTime<Utc>) -> Evaluation {
    let Some(last_acted) = state.last_acted else {
        return Evaluation::new(Action::Skip, StateDelta::Unchanged, Reason::NotYetObserved, None);
    };

    let elapsed = now - last_acted;
    let elapsed_some = Some(elapsed);

    if elapsed <= target.max_age() {
        return if state.alert_outstanding() {
            Evaluation::new(
                Action::ClearAlert,
                StateDelta::ClearLastAlerted,
                Reason::Recovered,
                elapsed_some,
            )
        } else {
            Evaluation::new(Action::None, StateDelta::Unchanged, Reason::Healthy, elapsed_some)
        };
    }

    if state.muted {
        return Evaluation::new(Action::None, StateDelta::Unchanged, Reason::Muted, elapsed_some);
    }

    let Some(last_alerted) = state.last_alerted else {
        return Evaluation::new(
            Action::FireFirstAlert,
            StateDelta::SetLastAlerted(now),
            Reason::FirstOverdue,
            elapsed_some,
        );
    };

    match cron::is_due(&target.alert_schedule, now) {
        Err(e) => Evaluation::new(
            Action::None,
            StateDelta::Unchanged,
            Reason::InvalidSchedule(e.to_string()),
            elapsed_some,
        ),
        Ok(false) => Evaluation::new(
            Action::None,
            StateDelta::Unchanged,
            Reason::ScheduleNotDue,
            elapsed_some,
        ),
        Ok(true) => {
            let since_last_alert = now - last_alerted;
            if since_last_alert >= Duration::seconds(MIN_REALERT_INTERVAL_SECS) {
                Evaluation::new(
                    Action::FireScheduledAlert,
                    StateDelta::SetLastAlerted(now),
                    Reason::ScheduleDue { since_last_alert },
                    elapsed_some,
                )
            } else {
                Evaluation::new(
                    Action::None,
                    StateDelta::Unchanged,
                    Reason::WithinRealertWindow { since_last_alert },
                    elapsed_some,
                )
            }
        }
    }
}

/// Whether a target with this state is currently past its `maxAge`
pub fn is_overdue(target: &Target, state: &TargetState, now: DateTime<Utc>) -> bool {
    state
        .last_acted
        .map(|last_acted| now - last_acted > target.max_age())
        .unwrap_or(false)
}

/// Render a duration the way a person would say it: "3 hours ago".
pub fn humanize_ago(elapsed: Duration) -> String {
    fn unit(n: i64, name: &str) -> String {
        if n == 1 {
            format!("1 {} ago", name)
        } else {
            format!("{} {}s ago", n, name)
        }
    }

    if elapsed.num_seconds() < 1 {
        "now".to_string()
    } else if elapsed.num_minutes() < 1 {
        unit(elapsed.num_seconds(), "second")
    } else if elapsed.num_hours() < 1 {
        unit(elapsed.num_minutes(), "minute")
    } else if elapsed.num_days() < 1 {
        unit(elapsed.num_hours(), "hour")
    } else {
        unit(elapsed.num_days(), "day")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    // 2024-05-01 was a Wednesday; 10:00 UTC
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn target(schedule: &str) -> Target {
        Target::new("backup", StdDuration::from_secs(3600), schedule)
    }

    fn state(last_acted: Option<i64>, last_alerted: Option<i64>, muted: bool) -> TargetState {
        TargetState {
            last_acted: last_acted.map(|s| now() - Duration::seconds(s)),
            last_alerted: last_alerted.map(|s| now() - Duration::seconds(s)),
            muted,
        }
    }

    #[test]
    fn test_never_reported_is_skipped() {
        for s in [state(None, None, false), state(None, Some(10_000), false), state(None, None, true)] {
            let eval = evaluate(&target("* * * * *"), &s, now());
            assert_eq!(eval.action, Action::Skip);
            assert_eq!(eval.delta, StateDelta::Unchanged);
            assert_eq!(eval.reason, Reason::NotYetObserved);
        }
    }

    #[test]
    fn test_healthy_is_idempotent() {
        let t = target("* * * * *");
        let s = state(Some(60), None, false);

        let first = evaluate(&t, &s, now());
        assert_eq!(first.action, Action::None);
        assert_eq!(first.delta, StateDelta::Unchanged);
        assert_eq!(evaluate(&t, &s, now()), first);
    }

    #[test]
    fn test_exactly_max_age_is_healthy() {
        let eval = evaluate(&target("* * * * *"), &state(Some(3600), None, false), now());
        assert_eq!(eval.action, Action::None);
        assert_eq!(eval.reason, Reason::Healthy);
    }

    #[test]
    fn test_first_overdue_fires_regardless_of_schedule() {
        // Schedule only matches on Feb 29th at midnight
        let t = target("0 0 29 2 *");
        let mut s = state(Some(7200), None, false);

        let eval = evaluate(&t, &s, now());
        assert_eq!(eval.action, Action::FireFirstAlert);
        assert_eq!(eval.delta, StateDelta::SetLastAlerted(now()));
        assert_eq!(eval.elapsed, Some(Duration::seconds(7200)));

        // Once recorded, the same overdue period does not fire again
        eval.delta.apply(&mut s);
        let again = evaluate(&t, &s, now() + Duration::minutes(1));
        assert_eq!(again.action, Action::None);
        assert_eq!(again.reason, Reason::ScheduleNotDue);
    }

    #[test]
    fn test_muted_overdue_never_fires() {
        let t = target("* * * * *");
        for s in [state(Some(7200), None, true), state(Some(7200), Some(7000), true)] {
            let eval = evaluate(&t, &s, now());
            assert_eq!(eval.action, Action::None);
            assert_eq!(eval.delta, StateDelta::Unchanged);
            assert_eq!(eval.reason, Reason::Muted);
        }
    }

    #[test]
    fn test_realert_window() {
        let t = target("0 * * * *");

        let recent = evaluate(&t, &state(Some(7200), Some(30 * 60), false), now());
        assert_eq!(recent.action, Action::None);
        assert!(matches!(recent.reason, Reason::WithinRealertWindow { .. }));

        let exactly = evaluate(&t, &state(Some(7200), Some(3600), false), now());
        assert_eq!(exactly.action, Action::FireScheduledAlert);

        let old = evaluate(&t, &state(Some(7200), Some(90 * 60), false), now());
        assert_eq!(old.action, Action::FireScheduledAlert);
        assert_eq!(old.delta, StateDelta::SetLastAlerted(now()));
    }

    #[test]
    fn test_schedule_not_due_suppresses_repeat() {
        // Due only at 09:00, now is 10:00
        let eval = evaluate(&target("0 9 * * *"), &state(Some(7200), Some(90 * 60), false), now());
        assert_eq!(eval.action, Action::None);
        assert_eq!(eval.reason, Reason::ScheduleNotDue);
    }

    #[test]
    fn test_invalid_schedule_does_not_fire() {
        let eval = evaluate(&target("bogus"), &state(Some(7200), Some(90 * 60), false), now());
        assert_eq!(eval.action, Action::None);
        assert!(matches!(eval.reason, Reason::InvalidSchedule(_)));

        // The first alert does not depend on the schedule at all
        let first = evaluate(&target("bogus"), &state(Some(7200), None, false), now());
        assert_eq!(first.action, Action::FireFirstAlert);
    }

    #[test]
    fn test_recovery_clears_then_idles() {
        let t = target("* * * * *");
        let mut s = state(Some(60), Some(600), false);

        let eval = evaluate(&t, &s, now());
        assert_eq!(eval.action, Action::ClearAlert);
        assert_eq!(eval.delta, StateDelta::ClearLastAlerted);

        eval.delta.apply(&mut s);
        let next = evaluate(&t, &s, now());
        assert_eq!(next.action, Action::None);
        assert_eq!(next.delta, StateDelta::Unchanged);
    }

    #[test]
    fn test_scenarios() {
        let t = target("0 * * * *");
        assert_eq!(
            evaluate(&t, &state(Some(7200), None, false), now()).action,
            Action::FireFirstAlert
        );
        assert_eq!(
            evaluate(&t, &state(Some(7200), None, true), now()).action,
            Action::None
        );
        assert_eq!(
            evaluate(&t, &state(Some(7200), Some(30 * 60), false), now()).action,
            Action::None
        );
        assert_eq!(
            evaluate(&t, &state(Some(7200), Some(90 * 60), false), now()).action,
            Action::FireScheduledAlert
        );
    }

    #[test]
    fn test_action_helpers() {
        assert!(Action::FireFirstAlert.fires());
        assert!(Action::FireScheduledAlert.fires());
        assert!(!Action::ClearAlert.fires());
        assert!(!Action::Skip.fires());
        assert_eq!(Action::FireScheduledAlert.as_str(), "fire_scheduled_alert");
    }

    #[test]
    fn test_is_overdue() {
        let t = target("* * * * *");
        assert!(!is_overdue(&t, &state(None, None, false), now()));
        assert!(!is_overdue(&t, &state(Some(3600), None, false), now()));
        assert!(is_overdue(&t, &state(Some(3601), None, true), now()));
    }

    #[test]
    fn test_humanize_ago() {
        assert_eq!(humanize_ago(Duration::zero()), "now");
        assert_eq!(humanize_ago(Duration::seconds(1)), "1 second ago");
        assert_eq!(humanize_ago(Duration::seconds(45)), "45 seconds ago");
        assert_eq!(humanize_ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(humanize_ago(Duration::hours(2)), "2 hours ago");
        assert_eq!(humanize_ago(Duration::days(3)), "3 days ago");
    }
}
