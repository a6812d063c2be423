use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Federated token issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

/// Audience-scoped token obtained by exchanging an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

/// Identity plus the application tokens minted from it, for one identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FqdnSession {
    pub identity: IdentityToken,
    pub applications: BTreeMap<String, ApplicationToken>,
}

/// Cached sessions keyed by identity provider fqdn.
pub type Session = BTreeMap<String, FqdnSession>;

/// Expiry checks shared by both token kinds.
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    fn will_expire_within(&self, window: Duration) -> bool {
        Utc::now() + window >= self.expires_at()
    }
}

impl Expiring for IdentityToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for ApplicationToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl IdentityToken {
    /// Whether this token was granted every scope in `requested`.
    pub fn covers_scopes<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        requested
            .iter()
            .all(|scope| self.scopes.iter().any(|owned| owned == scope.as_ref()))
    }
}
