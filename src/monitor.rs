//! Idle state machine
//!
//! Pure transition logic, driven by explicit instants:
//! - One deadline, derived from the last reset plus the idle budget
//! - Warning and countdown timers are computed from that same deadline
//! - Expiry happens at most once per instance
//!
//! [`crate::service::IdleMonitor`] runs this on a tokio task; tests drive it
//! directly with synthetic instants.

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::models::{ExpiryReason, MonitorSnapshot, MonitorState};
use crate::timers::{TimerKind, TimerToken, Timers};
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Observable outcome of one state machine input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Timers re-armed from now
    Armed,
    /// Activity arrived while it cannot reset the clock
    ActivityIgnored,
    /// Warning shown with the given countdown
    WarningShown { remaining_secs: u64 },
    /// Countdown advanced
    Tick { remaining_secs: u64 },
    /// User extended the session
    Extended,
    /// Logout must be performed
    Expired(ExpiryReason),
}

#[derive(Debug)]
pub struct IdleStateMachine {
    config: MonitorConfig,
    state: MonitorState,
    timers: Timers,
    /// Tokens of the timers this machine has armed and not yet seen fire
    live: Vec<TimerToken>,
    deadline: Option<Instant>,
    last_reset: Option<Instant>,
    remaining_secs: Option<u64>,
    expiry_reason: Option<ExpiryReason>,
}

impl IdleStateMachine {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: MonitorState::Stopped,
            timers: Timers::new(),
            live: Vec::new(),
            deadline: None,
            last_reset: None,
            remaining_secs: None,
            expiry_reason: None,
        }
    }

    /// Begin observing, or restart the clock if already observing
    pub fn start(&mut self, now: Instant) -> Result<Transition, MonitorError> {
        if self.state == MonitorState::Expired {
            return Err(MonitorError::SessionExpired);
        }
        self.rearm(now);
        Ok(Transition::Armed)
    }

    /// Qualifying activity. Only resets the clock while `Active`; a visible
    /// warning must be dismissed with [`IdleStateMachine::extend`].
    pub fn record_activity(&mut self, now: Instant) -> Transition {
        match self.state {
            MonitorState::Active => {
                self.rearm(now);
                Transition::Armed
            }
            MonitorState::Warning => {
                debug!("Activity ignored while logout warning is shown");
                Transition::ActivityIgnored
            }
            MonitorState::Stopped | MonitorState::Expired => Transition::ActivityIgnored,
        }
    }

    /// Explicit extension from the warning dialog
    pub fn extend(&mut self, now: Instant) -> Result<Transition, MonitorError> {
        match self.state {
            MonitorState::Expired => Err(MonitorError::SessionExpired),
            MonitorState::Stopped => Err(MonitorError::NotRunning),
            MonitorState::Active | MonitorState::Warning => {
                self.rearm(now);
                Ok(Transition::Extended)
            }
        }
    }

    /// Expire immediately. Returns `None` if already expired.
    pub fn expire(&mut self, reason: ExpiryReason) -> Option<Transition> {
        if self.state == MonitorState::Expired {
            return None;
        }
        self.cancel_all();
        self.state = MonitorState::Expired;
        self.remaining_secs = Some(0);
        self.expiry_reason = Some(reason);
        Some(Transition::Expired(reason))
    }

    /// Cancel every timer. Safe to call repeatedly; `Expired` stays terminal.
    pub fn stop(&mut self) {
        self.cancel_all();
        if self.state != MonitorState::Expired {
            self.state = MonitorState::Stopped;
            self.deadline = None;
            self.remaining_secs = None;
        }
    }

    /// Fire every timer due at or before `now`, in order
    pub fn poll(&mut self, now: Instant) -> Vec<Transition> {
        let mut transitions = Vec::new();

        while let Some(token) = self.timers.pop_due(now) {
            self.live.retain(|live| *live != token);
            let transition = match token.kind() {
                TimerKind::Deadline => self.expire(ExpiryReason::IdleTimeout),
                TimerKind::Warning => self.enter_warning(now),
                TimerKind::Countdown => self.tick(now),
            };
            transitions.extend(transition);

            if self.state == MonitorState::Expired {
                break;
            }
        }

        transitions
    }

    /// When the host must call [`IdleStateMachine::poll`] next
    pub fn next_wake(&self) -> Option<Instant> {
        self.timers.next_due()
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Instant of the forced logout while observing
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining_secs(&self) -> Option<u64> {
        self.remaining_secs
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.armed_count()
    }

    pub fn snapshot(&self, now: Instant, session_id: Option<Uuid>) -> MonitorSnapshot {
        let wall_now = Utc::now();
        let observing = matches!(self.state, MonitorState::Active | MonitorState::Warning);

        let logout_at = self
            .deadline
            .filter(|_| observing)
            .and_then(|deadline| chrono::Duration::from_std(deadline.saturating_duration_since(now)).ok())
            .map(|until| wall_now + until);

        let last_activity = self
            .last_reset
            .and_then(|reset| chrono::Duration::from_std(now.saturating_duration_since(reset)).ok())
            .map(|since| wall_now - since);

        MonitorSnapshot {
            state: self.state,
            session_id,
            remaining_secs: self.remaining_secs,
            logout_at,
            last_activity,
            expiry_reason: self.expiry_reason,
        }
    }

    fn rearm(&mut self, now: Instant) {
        let deadline = now + self.config.idle_budget;

        self.cancel_all();
        self.schedule(TimerKind::Deadline, deadline);
        self.schedule(TimerKind::Warning, now + self.config.warning_after());

        self.state = MonitorState::Active;
        self.deadline = Some(deadline);
        self.last_reset = Some(now);
        self.remaining_secs = None;

        debug!(
            "Idle timers armed: warning in {}s, logout in {}s",
            self.config.warning_after().as_secs(),
            self.config.idle_budget.as_secs()
        );
    }

    fn enter_warning(&mut self, now: Instant) -> Option<Transition> {
        if self.state != MonitorState::Active {
            return None;
        }
        let deadline = self.deadline?;
        let remaining_secs = secs_until(deadline, now);

        self.state = MonitorState::Warning;
        self.remaining_secs = Some(remaining_secs);
        self.arm_countdown(now, deadline);

        Some(Transition::WarningShown { remaining_secs })
    }

    fn tick(&mut self, now: Instant) -> Option<Transition> {
        if self.state != MonitorState::Warning {
            return None;
        }
        let deadline = self.deadline?;
        let remaining_secs = secs_until(deadline, now);
        self.remaining_secs = Some(remaining_secs);

        if remaining_secs == 0 {
            return self.expire(ExpiryReason::CountdownElapsed);
        }

        self.arm_countdown(now, deadline);
        debug!("Logout countdown: {}s remaining", remaining_secs);
        Some(Transition::Tick { remaining_secs })
    }

    fn arm_countdown(&mut self, now: Instant, deadline: Instant) {
        let next = now
            .checked_add(self.config.countdown_interval)
            .map_or(deadline, |next| next.min(deadline));
        self.schedule(TimerKind::Countdown, next);
    }

    fn schedule(&mut self, kind: TimerKind, at: Instant) {
        let token = self.timers.arm(kind, at);
        self.live.push(token);
    }

    fn cancel_all(&mut self) {
        for token in self.live.drain(..) {
            self.timers.cancel(token);
        }
    }
}

/// Whole seconds until `deadline`, rounded up
fn secs_until(deadline: Instant, now: Instant) -> u64 {
    let left: Duration = deadline.saturating_duration_since(now);
    left.as_secs() + u64::from(left.subsec_nanos() > 0)
}
