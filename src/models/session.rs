// src/models/session.rs
use super::chat::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Bearer token plus the user it was issued for. Created at login, destroyed
/// at logout; chat components only read it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub token: String,
    pub user: UserProfile,
}

impl SessionIdentity {
    pub fn new(token: impl Into<String>, user: UserProfile) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Keep the token out of logs
impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Claims read from a backend-issued JWT when restoring a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// The single session handle passed explicitly to every component that
/// needs the token or the user id.
#[derive(Debug, Clone)]
pub struct SessionContext {
    identity: Arc<SessionIdentity>,
}

impl SessionContext {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn token(&self) -> &str {
        &self.identity.token
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user.id
    }
}
