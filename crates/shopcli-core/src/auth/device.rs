use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::AuthConfig;

use super::exchange::{Grant, TokenExchanger};
use super::{AuthError, Host, IdentityToken, OAuthErrorCode};

const DEFAULT_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_INCREMENT_SECS: u64 = 5;
const UNKNOWN_ERROR_BUDGET_SECS: u64 = 120;

/// Run the device authorization flow end to end and return the identity token.
pub async fn device_authorize(
    exchanger: &TokenExchanger,
    host: &Host,
    scopes: &[String],
) -> Result<IdentityToken, AuthError> {
    let config = exchanger.config();
    host.console.info("To run this command, log in to Shopify.");
    if config.ci {
        return Err(AuthError::NonInteractive);
    }

    let authorization = exchanger.request_device_authorization(scopes).await?;
    let link = authorization
        .verification_uri_complete
        .as_deref()
        .unwrap_or(&authorization.verification_uri);
    host.console
        .info(&format!("User verification code: {}", authorization.user_code));
    present_link(config, host, link).await?;

    let device_code = authorization.device_code.as_str();
    poll_for_device_authorization(authorization.interval, move || {
        exchanger.exchange_device_code(device_code)
    })
    .await
}

async fn present_link(config: &AuthConfig, host: &Host, link: &str) -> Result<(), AuthError> {
    let manual = format!("Open this link to start the auth process: {link}");
    if config.cloud_environment || !host.console.is_interactive() {
        host.console.info(&manual);
        return Ok(());
    }

    host.console
        .info("Press Enter to open the login page on your browser");
    host.console.keypress().await?;
    if host.browser.open_url(link).await? {
        host.console
            .info(&format!("Opened link to start the auth process: {link}"));
    } else {
        host.console.info(&manual);
    }
    Ok(())
}

/// Poll the device-code grant until it yields a token or fails terminally.
///
/// `authorization_pending` and `slow_down` reset the unknown-error budget;
/// `slow_down` also widens the interval. Any other code counts the elapsed
/// interval against a 120 second budget.
pub async fn poll_for_device_authorization<F, Fut>(
    interval: Option<u64>,
    mut poll: F,
) -> Result<IdentityToken, AuthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Grant<IdentityToken>, AuthError>>,
{
    let mut interval = interval.unwrap_or(DEFAULT_INTERVAL_SECS);
    let mut unknown_error_secs = 0;

    loop {
        sleep(Duration::from_secs(interval)).await;
        match poll().await? {
            Ok(token) => {
                info!("device authorization granted");
                return Ok(token);
            }
            Err(OAuthErrorCode::AuthorizationPending) => {
                unknown_error_secs = 0;
            }
            Err(OAuthErrorCode::SlowDown) => {
                unknown_error_secs = 0;
                interval += SLOW_DOWN_INCREMENT_SECS;
                debug!(interval, "identity service asked to slow down polling");
            }
            Err(code @ (OAuthErrorCode::AccessDenied | OAuthErrorCode::ExpiredToken)) => {
                return Err(AuthError::DeviceAuthorization(code));
            }
            Err(code) => {
                unknown_error_secs += interval;
                debug!(%code, unknown_error_secs, "unexpected device authorization response");
                if unknown_error_secs >= UNKNOWN_ERROR_BUDGET_SECS {
                    return Err(AuthError::DeviceAuthorizationTimedOut);
                }
            }
        }
    }
}
