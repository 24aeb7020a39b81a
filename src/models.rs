use crate::error::MonitorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Authenticated session protected by the idle monitor
#[derive(Clone, Serialize)]
pub struct Session {
    /// Local session instance ID
    pub id: Uuid,

    /// Backend user ID
    pub user_id: u64,

    /// Login name
    pub username: String,

    /// Display name
    pub name: String,

    /// Portal role (e.g. "admin")
    pub role: String,

    /// Bearer token sent to the backend
    #[serde(skip_serializing)]
    pub token: String,

    /// When the session was created on this client
    pub created_at: DateTime<Utc>,

    /// Token expiry, when the token carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Claims the portal backend puts in its tokens
#[derive(Debug, Deserialize)]
struct TokenClaims {
    user_id: u64,
    username: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    role: String,
    exp: Option<i64>,
}

impl Session {
    /// Create a new session
    pub fn new(user_id: u64, username: String, role: String, token: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: username.clone(),
            username,
            role,
            token,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Build a session from the token returned by the login endpoint.
    ///
    /// Only the payload is decoded. The signature is the backend's business;
    /// the client never holds the signing secret.
    pub fn from_bearer_token(token: &str) -> Result<Self, MonitorError> {
        use base64::{engine::general_purpose, Engine as _};

        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(MonitorError::InvalidSession("Invalid JWT format".to_string()));
        }

        let decoded = general_purpose::URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .map_err(|_| MonitorError::InvalidSession("Invalid base64 encoding".to_string()))?;

        let claims: TokenClaims = serde_json::from_slice(&decoded)
            .map_err(|_| MonitorError::InvalidSession("Invalid JWT claims".to_string()))?;

        let expires_at = match claims.exp {
            Some(exp) => Some(DateTime::from_timestamp(exp, 0).ok_or_else(|| {
                MonitorError::InvalidSession("Invalid expiry timestamp".to_string())
            })?),
            None => None,
        };

        let name = if claims.name.is_empty() {
            claims.username.clone()
        } else {
            claims.name
        };

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: claims.user_id,
            username: claims.username,
            name,
            role: claims.role,
            token: token.to_string(),
            created_at: Utc::now(),
            expires_at,
        })
    }

    /// Set the token expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the session's role is one of `roles`. An empty list admits any role.
    pub fn has_role(&self, roles: &[&str]) -> bool {
        roles.is_empty() || roles.iter().any(|role| *role == self.role)
    }

    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Monitor state as seen by the UI
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Not observing a session
    #[default]
    Stopped,
    /// Timers running, no warning shown
    Active,
    /// Logout countdown visible
    Warning,
    /// Logout issued; terminal for the session
    Expired,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Stopped => write!(f, "stopped"),
            MonitorState::Active => write!(f, "active"),
            MonitorState::Warning => write!(f, "warning"),
            MonitorState::Expired => write!(f, "expired"),
        }
    }
}

/// Why a session was logged out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// Idle deadline reached
    IdleTimeout,
    /// Warning countdown reached zero
    CountdownElapsed,
    /// Backend refused the session token
    ServerRejected,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryReason::IdleTimeout => write!(f, "idle timeout"),
            ExpiryReason::CountdownElapsed => write!(f, "countdown elapsed"),
            ExpiryReason::ServerRejected => write!(f, "rejected by server"),
        }
    }
}

/// Point-in-time view of the monitor for the warning dialog
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub state: MonitorState,

    /// Session being observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,

    /// Seconds until forced logout, only while warning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,

    /// Wall-clock time of the forced logout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_at: Option<DateTime<Utc>>,

    /// Last qualifying activity or extension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_reason: Option<ExpiryReason>,
}

impl MonitorSnapshot {
    pub fn is_warning(&self) -> bool {
        self.state == MonitorState::Warning
    }

    pub fn is_expired(&self) -> bool {
        self.state == MonitorState::Expired
    }

    /// Remaining time as M:SS, e.g. "4:59"
    pub fn remaining_formatted(&self) -> Option<String> {
        self.remaining_secs
            .map(|secs| format!("{}:{:02}", secs / 60, secs % 60))
    }
}
