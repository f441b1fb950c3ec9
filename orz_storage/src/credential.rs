use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The locally persisted API credential.
///
/// JSON on disk looks like:
/// `{ "api_token":"…", "expires_at":"2026-01-17T10:00:00Z", "user":{ "login":"octo" } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "api_token")]
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Account>,
}

/// Account details returned by the control plane at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub plan: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
            user: None,
        }
    }

    /// A credential that stays valid for `ttl` from now.
    pub fn valid_for(token: impl Into<String>, ttl: Duration) -> Self {
        Self::new(token, Utc::now() + ttl)
    }

    pub fn with_user(mut self, user: Account) -> Self {
        self.user = Some(user);
        self
    }

    /// `true` once `now` has reached `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
