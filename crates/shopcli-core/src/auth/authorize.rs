use tokio::time::sleep;
use tracing::{debug, info};

use super::exchange::{CodeAuthResult, TokenExchanger};
use super::redirect::{RedirectListener, RedirectParams};
use super::{utils, AuthError, Host, PkcePair};

/// Run the browser authorization-code flow and return the code with its PKCE verifier.
///
/// `state` defaults to a fresh random value. The fallback link is printed once
/// `fallback_link_delay` passes, and the listener keeps waiting afterwards.
pub async fn authorize(
    exchanger: &TokenExchanger,
    host: &Host,
    scopes: &[String],
    state: Option<String>,
) -> Result<CodeAuthResult, AuthError> {
    let config = exchanger.config();
    let state = state.unwrap_or_else(|| utils::random_hex(32));
    let pkce = PkcePair::generate();
    let url = exchanger.authorization_url(scopes, &state, &pkce)?;

    ensure_port_free(host, &config.redirect_host, config.redirect_port).await?;

    host.console
        .info("Press Enter to open the login page on your browser");
    host.console.keypress().await?;

    let mut listener = RedirectListener::bind(&config.redirect_host, config.redirect_port).await?;
    if !host.browser.open_url(url.as_str()).await? {
        host.console.warn("Couldn't open your browser automatically.");
    }

    let fallback = sleep(config.fallback_link_delay);
    tokio::pin!(fallback);
    let mut fallback_shown = false;
    let params = loop {
        tokio::select! {
            result = listener.wait() => break result?,
            _ = &mut fallback, if !fallback_shown => {
                fallback_shown = true;
                host.console.info(&format!(
                    "If the browser didn't open, use this link to log in:\n{url}"
                ));
            }
        }
    };
    listener.stop();

    let code = check_state(&state, params)?;
    info!("authorization code received");
    Ok(CodeAuthResult {
        code,
        code_verifier: pkce.into_verifier(),
    })
}

/// Accept the redirect only when it carries the state that was sent.
pub fn check_state(expected: &str, params: RedirectParams) -> Result<String, AuthError> {
    if params.state == expected {
        Ok(params.code)
    } else {
        Err(AuthError::StateMismatch)
    }
}

async fn ensure_port_free(host: &Host, redirect_host: &str, port: u16) -> Result<(), AuthError> {
    if host.ports.is_port_free(redirect_host, port).await {
        return Ok(());
    }

    debug!(port, "redirect port is in use");
    let kill = host
        .console
        .confirm(&format!(
            "Port {port} is in use. Terminate the process using it to continue logging in?"
        ))
        .await?;
    if !kill {
        return Err(AuthError::Cancelled);
    }
    host.ports.kill_process_on_port(port).await
}
