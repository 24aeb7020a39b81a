use crate::activity::ActivityKind;
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default inactivity window before forced logout (60 minutes)
const DEFAULT_IDLE_BUDGET: Duration = Duration::from_secs(60 * 60);

/// Default lead time of the logout warning (5 minutes)
const DEFAULT_WARNING_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Longest idle budget or countdown interval accepted (one day)
const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// What to do when the host cannot provide activity events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListenerFailurePolicy {
    /// Refuse to start; the session is not timeout-protected
    #[default]
    FailClosed,
    /// Log the failure and run the session without idle protection
    ProceedUnprotected,
}

/// Idle monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Inactivity window before forced logout (default: 60 minutes)
    #[serde(with = "duration_secs", rename = "idle_budget_secs")]
    pub idle_budget: Duration,

    /// Warning lead time before forced logout (default: 5 minutes)
    #[serde(with = "duration_secs", rename = "warning_threshold_secs")]
    pub warning_threshold: Duration,

    /// Countdown refresh interval while warning (default: 1 second)
    #[serde(with = "duration_secs", rename = "countdown_interval_secs")]
    pub countdown_interval: Duration,

    /// Host events counted as user presence (default: all kinds)
    pub activity_events: Vec<ActivityKind>,

    /// Route the host is sent to after forced logout (default: "/login")
    pub login_route: String,

    /// Behavior when activity listeners cannot be attached
    pub listener_failure: ListenerFailurePolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_budget: DEFAULT_IDLE_BUDGET,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            countdown_interval: Duration::from_secs(1),
            activity_events: ActivityKind::ALL.to_vec(),
            login_route: "/login".to_string(),
            listener_failure: ListenerFailurePolicy::FailClosed,
        }
    }
}

impl MonitorConfig {
    /// Short windows for tests and demos
    pub fn testing() -> Self {
        Self {
            idle_budget: Duration::from_secs(30),
            warning_threshold: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Shared workstations in the village office
    pub fn high_security() -> Self {
        Self {
            idle_budget: Duration::from_secs(15 * 60),
            warning_threshold: Duration::from_secs(2 * 60),
            ..Self::default()
        }
    }

    /// Parse a JSON config; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Time from the last reset until the warning is shown
    pub fn warning_after(&self) -> Duration {
        self.idle_budget.saturating_sub(self.warning_threshold)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.idle_budget.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "idle budget must be positive".to_string(),
            ));
        }
        if self.idle_budget > MAX_WINDOW {
            return Err(MonitorError::InvalidConfig(format!(
                "idle budget ({}s) exceeds the {}s maximum",
                self.idle_budget.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        if self.warning_threshold >= self.idle_budget {
            return Err(MonitorError::InvalidConfig(format!(
                "warning threshold ({}s) must be shorter than idle budget ({}s)",
                self.warning_threshold.as_secs(),
                self.idle_budget.as_secs()
            )));
        }
        if self.countdown_interval.is_zero() || self.countdown_interval > MAX_WINDOW {
            return Err(MonitorError::InvalidConfig(
                "countdown interval must be between 1s and one day".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
