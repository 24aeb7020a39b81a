use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Failed to attach activity listeners: {0}")]
    ListenerAttach(String),

    #[error("Logout failed: {0}")]
    Logout(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Idle monitor is not running")]
    NotRunning,

    #[error("Invalid monitor configuration: {0}")]
    InvalidConfig(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Serialization(err.to_string())
    }
}
