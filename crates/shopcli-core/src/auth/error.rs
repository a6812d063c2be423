use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

use super::redirect::RedirectError;

/// Error codes the identity provider returns from its OAuth endpoints.
///
/// These are expected outcomes, so grant operations hand them back as values
/// instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthErrorCode {
    /// The grant is no longer usable; a full login is required.
    InvalidGrant,
    /// The cached session is unusable and must be purged.
    InvalidRequest,
    /// The user cannot develop against the requested store.
    InvalidTarget,
    AuthorizationPending,
    SlowDown,
    AccessDenied,
    ExpiredToken,
    Other(String),
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            OAuthErrorCode::InvalidGrant => "invalid_grant",
            OAuthErrorCode::InvalidRequest => "invalid_request",
            OAuthErrorCode::InvalidTarget => "invalid_target",
            OAuthErrorCode::AuthorizationPending => "authorization_pending",
            OAuthErrorCode::SlowDown => "slow_down",
            OAuthErrorCode::AccessDenied => "access_denied",
            OAuthErrorCode::ExpiredToken => "expired_token",
            OAuthErrorCode::Other(code) => code,
        }
    }
}

impl From<&str> for OAuthErrorCode {
    fn from(value: &str) -> Self {
        match value {
            "invalid_grant" => OAuthErrorCode::InvalidGrant,
            "invalid_request" => OAuthErrorCode::InvalidRequest,
            "invalid_target" => OAuthErrorCode::InvalidTarget,
            "authorization_pending" => OAuthErrorCode::AuthorizationPending,
            "slow_down" => OAuthErrorCode::SlowDown,
            "access_denied" => OAuthErrorCode::AccessDenied,
            "expired_token" => OAuthErrorCode::ExpiredToken,
            other => OAuthErrorCode::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by authentication and session management routines.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("identity service error {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },
    #[error("invalid identity service response: {0}")]
    InvalidResponse(String),
    #[error("authorization listener terminated before receiving redirect")]
    ListenerClosed,
    #[error("authorization flow cancelled")]
    Cancelled,
    #[error("authorization state mismatch")]
    StateMismatch,
    #[error("failed to launch system browser: {0}")]
    BrowserLaunch(String),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
    #[error("authentication failed: {0}")]
    OAuth(OAuthErrorCode),
    #[error("you are not authorized to use the CLI to develop in {store}")]
    StoreAccessDenied { store: String },
    #[error("error validating auth session")]
    SessionCorrupted,
    #[error("couldn't find your Partners organization")]
    MissingPartnerOrganization,
    #[error("the custom token provided is invalid")]
    InvalidPartnersToken,
    #[error("device authorization failed: {0}")]
    DeviceAuthorization(OAuthErrorCode),
    #[error("device authorization failed: no token after repeated identity service errors")]
    DeviceAuthorizationTimedOut,
    #[error("authorization is required, but the current environment does not support interactive prompts")]
    NonInteractive,
    #[error("bug: {0}")]
    Bug(String),
}

impl AuthError {
    /// Whether the error is the user declining to continue, which should exit quietly.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AuthError::Cancelled)
    }

    /// Next step to show alongside user-actionable aborts.
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            AuthError::StateMismatch => Some(
                "The authorization link may be stale or was not started by this CLI. Run the command again to log in.",
            ),
            AuthError::SessionCorrupted => {
                Some("We've cleared the current session, please try again.")
            }
            AuthError::MissingPartnerOrganization => {
                Some("Have you confirmed your accounts from the emails you received?")
            }
            AuthError::InvalidPartnersToken => {
                Some("Ensure the token is correct and not expired.")
            }
            AuthError::StoreAccessDenied { .. } => Some(STORE_ACCESS_REMEDY),
            AuthError::NonInteractive => Some(
                "Set SHOPCLI_PARTNERS_TOKEN, or run the command in an interactive environment such as your local terminal.",
            ),
            _ => None,
        }
    }
}

const STORE_ACCESS_REMEDY: &str = "You can't use the CLI with development stores if you only have Partner staff member access. \
Be the store owner or create a staff account on the store. \
If you're the store owner, log in to the store admin directly at least once before logging in with the CLI.";
