//! Idle session monitor for the payroll portal
//!
//! Logs a signed-in user out after a period without input, with a
//! countdown warning and an explicit "extend session" action before it
//! happens.

pub mod activity;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod service;
pub mod timers;

// Re-export commonly used types
pub use activity::{ActivityKind, ActivitySink, ActivitySource, ChannelActivitySource, Subscription};
pub use auth::{AuthProvider, Navigator, SessionStore};
pub use config::{ListenerFailurePolicy, MonitorConfig};
pub use error::MonitorError;
pub use models::{ExpiryReason, MonitorSnapshot, MonitorState, Session};
pub use monitor::{IdleStateMachine, Transition};
pub use service::IdleMonitor;
pub use timers::{TimerKind, TimerToken, Timers};
