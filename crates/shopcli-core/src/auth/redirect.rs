use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::AuthError;

const SUCCESS_HTML: &str = r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>Logged in</title></head><body><h1>You're logged in</h1><p>You can close this window and return to your terminal.</p></body></html>"#;

/// Why a redirect did not carry a usable authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectError {
    #[error("the authorization redirect had no URL")]
    EmptyUrl,
    #[error("authorization failed: {0}")]
    Authentication(String),
    #[error("the authorization redirect had no code")]
    MissingCode,
    #[error("the authorization redirect had no state")]
    MissingState,
}

/// Authorization code and state captured from the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectParams {
    pub code: String,
    pub state: String,
}

/// Classify the request target of a redirect.
pub fn classify_redirect(path: Option<&str>) -> Result<RedirectParams, RedirectError> {
    let path = path
        .filter(|path| !path.is_empty())
        .ok_or(RedirectError::EmptyUrl)?;
    let url = Url::parse(&format!("http://localhost{path}")).map_err(|_| RedirectError::EmptyUrl)?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if error.is_some() || description.is_some() {
        return Err(RedirectError::Authentication(
            description.or(error).unwrap_or_default(),
        ));
    }
    let code = code.ok_or(RedirectError::MissingCode)?;
    let state = state.ok_or(RedirectError::MissingState)?;
    Ok(RedirectParams { code, state })
}

/// One-shot loopback server that captures the browser's OAuth redirect.
///
/// The browser always receives the same success page; the outcome is only
/// reported to the caller through [`RedirectListener::wait`].
#[derive(Debug)]
pub struct RedirectListener {
    local_addr: SocketAddr,
    outcome: oneshot::Receiver<Result<RedirectParams, AuthError>>,
    task: JoinHandle<()>,
}

impl RedirectListener {
    pub async fn bind(host: &str, port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "redirect listener started");

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let outcome = match listener.accept().await {
                Ok((stream, _)) => handle_connection(stream).await,
                Err(err) => Err(AuthError::Io(err)),
            };
            let _ = tx.send(outcome);
        });

        Ok(Self {
            local_addr,
            outcome: rx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first redirect. Cancel-safe, so it can be polled from a `select!` loop.
    pub async fn wait(&mut self) -> Result<RedirectParams, AuthError> {
        (&mut self.outcome)
            .await
            .map_err(|_| AuthError::ListenerClosed)?
    }

    /// Shut the server down without waiting for a request.
    pub fn stop(self) {
        debug!(local_addr = %self.local_addr, "redirect listener stopped");
    }
}

impl Drop for RedirectListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(mut stream: TcpStream) -> Result<RedirectParams, AuthError> {
    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1));
    let outcome = classify_redirect(path);

    respond(&mut stream, SUCCESS_HTML).await?;
    let _ = stream.shutdown().await;
    Ok(outcome?)
}

async fn respond(stream: &mut TcpStream, body: &str) -> Result<(), AuthError> {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
