use chrono::Duration;
use tracing::debug;

use crate::config::Environment;

use super::{AuthRequest, Expiring, FqdnSession};

/// What the cached session needs before it can serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Ok,
    NeedsRefresh,
    NeedsFullAuth,
}

/// Decide whether the cached session for the active fqdn can serve `request`.
///
/// `partners_revoked` is the outcome of the server-side revocation check on the
/// cached partners token; the caller only runs it when partners is requested.
/// Tokens expiring within `margin` count as expired.
pub fn validate_session(
    requested_scopes: &[String],
    request: &AuthRequest,
    session: Option<&FqdnSession>,
    partners_revoked: bool,
    margin: Duration,
    environment: &Environment,
) -> ValidationResult {
    let Some(session) = session else {
        debug!("no cached session");
        return ValidationResult::NeedsFullAuth;
    };

    if !session.identity.covers_scopes(requested_scopes) {
        debug!("cached identity token lacks requested scopes");
        return ValidationResult::NeedsFullAuth;
    }

    if partners_revoked {
        debug!("cached partners token was revoked");
        return ValidationResult::NeedsFullAuth;
    }

    let mut expired = session.identity.will_expire_within(margin);
    for application in request.applications() {
        let key = application
            .audience()
            .token_key(environment, request.admin_store());
        let token_expired = session
            .applications
            .get(&key)
            .map_or(true, |token| token.will_expire_within(margin));
        if token_expired {
            debug!(audience = application.audience().as_str(), "application token missing or expiring");
        }
        expired |= token_expired;
    }

    if expired {
        ValidationResult::NeedsRefresh
    } else {
        ValidationResult::Ok
    }
}
