use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::config::AutoSaveConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSaveStatus {
    Disabled,
    Idle {
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        since: OffsetDateTime,
    },
    Error {
        message: String,
        occurred_at: OffsetDateTime,
    },
}

/// Debounce deadline for the active entry. Every edit pushes the deadline
/// out again; the owner polls [`AutoSaveTimer::is_due_at`] from its tick.
#[derive(Debug)]
pub struct AutoSaveTimer {
    enabled: bool,
    debounce: Duration,
    deadline: Option<Instant>,
    dirty_since_wall: Option<OffsetDateTime>,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<AutoSaveFailure>,
}

#[derive(Debug, Clone)]
struct AutoSaveFailure {
    message: String,
    occurred_at: OffsetDateTime,
}

impl AutoSaveTimer {
    pub fn new(config: &AutoSaveConfig) -> Self {
        Self {
            enabled: config.enabled,
            debounce: Duration::from_millis(config.debounce_ms),
            deadline: None,
            dirty_since_wall: None,
            last_saved_at: None,
            last_error: None,
        }
    }

    pub fn status(&self) -> AutoSaveStatus {
        if !self.enabled {
            return AutoSaveStatus::Disabled;
        }
        if let Some(failure) = &self.last_error {
            return AutoSaveStatus::Error {
                message: failure.message.clone(),
                occurred_at: failure.occurred_at,
            };
        }
        if self.deadline.is_some() {
            let since = self
                .dirty_since_wall
                .unwrap_or_else(OffsetDateTime::now_utc);
            return AutoSaveStatus::Pending { since };
        }
        AutoSaveStatus::Idle {
            last_saved_at: self.last_saved_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn schedule(&mut self) {
        self.schedule_at(Instant::now());
    }

    /// Restarts the debounce window from `now`, replacing any earlier
    /// deadline.
    pub fn schedule_at(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.dirty_since_wall = Some(OffsetDateTime::now_utc());
        }
        self.deadline = Some(now + self.debounce);
        self.last_error = None;
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.dirty_since_wall = None;
    }

    pub fn is_due_at(&self, now: Instant) -> bool {
        self.enabled && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Records a completed write. A deadline scheduled after that write was
    /// queued stays armed.
    pub fn record_saved(&mut self, timestamp: OffsetDateTime) {
        self.last_saved_at = Some(timestamp);
        self.last_error = None;
    }

    pub fn record_failure(&mut self, message: String) {
        self.last_error = Some(AutoSaveFailure {
            message,
            occurred_at: OffsetDateTime::now_utc(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn timer(debounce_ms: u64) -> AutoSaveTimer {
        AutoSaveTimer::new(&AutoSaveConfig {
            debounce_ms,
            enabled: true,
        })
    }

    #[test]
    fn repeated_edits_push_the_deadline_out() {
        let mut timer = timer(800);
        let start = Instant::now();
        timer.schedule_at(start);
        timer.schedule_at(start + Duration::from_millis(500));
        assert!(!timer.is_due_at(start + Duration::from_millis(900)));
        assert!(timer.is_due_at(start + Duration::from_millis(1300)));
        assert_matches!(timer.status(), AutoSaveStatus::Pending { .. });
    }

    #[test]
    fn saving_does_not_disarm_a_newer_deadline() {
        let mut timer = timer(0);
        timer.schedule();
        assert!(timer.is_due_at(Instant::now()));
        timer.cancel();
        assert!(!timer.is_due_at(Instant::now()));

        timer.schedule();
        let saved_at = OffsetDateTime::now_utc();
        timer.record_saved(saved_at);
        assert!(timer.is_pending());
        timer.cancel();
        assert_eq!(
            timer.status(),
            AutoSaveStatus::Idle {
                last_saved_at: Some(saved_at)
            }
        );
    }

    #[test]
    fn failures_are_reported_until_next_edit() {
        let mut timer = timer(0);
        timer.schedule();
        timer.record_failure("disk full".into());
        assert_matches!(timer.status(), AutoSaveStatus::Error { ref message, .. } if message == "disk full");
        timer.schedule();
        assert_matches!(timer.status(), AutoSaveStatus::Pending { .. });
    }

    #[test]
    fn disabled_timer_never_fires() {
        let mut timer = AutoSaveTimer::new(&AutoSaveConfig {
            debounce_ms: 0,
            enabled: false,
        });
        timer.schedule();
        assert!(timer.is_pending());
        assert!(!timer.is_due_at(Instant::now()));
        assert_eq!(timer.status(), AutoSaveStatus::Disabled);
    }
}
