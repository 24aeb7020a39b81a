//! Timer slots with cancellation tokens
//!
//! Each timer kind owns exactly one slot. Arming a slot replaces whatever
//! was armed there, so a stale instance can never fire after a re-arm.

use tokio::time::Instant;

/// Timers the idle monitor schedules.
///
/// The declaration order is the firing order for timers due at the same
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Forced logout
    Deadline,
    /// Switch to the warning state
    Warning,
    /// One countdown tick while warning
    Countdown,
}

impl TimerKind {
    const COUNT: usize = 3;

    fn slot(self) -> usize {
        match self {
            TimerKind::Deadline => 0,
            TimerKind::Warning => 1,
            TimerKind::Countdown => 2,
        }
    }
}

/// Handle for one armed timer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    kind: TimerKind,
    generation: u64,
}

impl TimerToken {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    at: Instant,
    token: TimerToken,
}

#[derive(Debug, Default)]
pub struct Timers {
    slots: [Option<Armed>; TimerKind::COUNT],
    next_generation: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire at `at`, cancelling the previous instance
    pub fn arm(&mut self, kind: TimerKind, at: Instant) -> TimerToken {
        self.next_generation += 1;
        let token = TimerToken {
            kind,
            generation: self.next_generation,
        };
        self.slots[kind.slot()] = Some(Armed { at, token });
        token
    }

    /// Cancel the instance `token` names. A token whose slot has since been
    /// re-armed or fired cancels nothing.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        let slot = &mut self.slots[token.kind.slot()];
        if slot.is_some_and(|armed| armed.token == token) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn armed_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Earliest instant any armed timer fires
    pub fn next_due(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|armed| armed.at).min()
    }

    /// Remove and return the earliest timer due at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerToken> {
        let armed = self
            .slots
            .iter()
            .flatten()
            .filter(|armed| armed.at <= now)
            .min_by_key(|armed| (armed.at, armed.token.kind))
            .copied()?;

        self.slots[armed.token.kind.slot()] = None;
        Some(armed.token)
    }
}
