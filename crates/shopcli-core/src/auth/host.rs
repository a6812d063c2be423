//! Collaborators the authentication flows need from the surrounding program.
//!
//! Each concern sits behind a trait so flows can run against fakes in tests;
//! [`Host::system`] wires the real implementations.

use std::io::IsTerminal;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{debug, warn};

use super::AuthError;

/// Opens URLs in the user's default browser.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Returns `false` when no browser could be launched.
    async fn open_url(&self, url: &str) -> Result<bool, AuthError>;
}

/// Checks and frees the local port used by the redirect listener.
#[async_trait]
pub trait PortControl: Send + Sync {
    async fn is_port_free(&self, host: &str, port: u16) -> bool;
    async fn kill_process_on_port(&self, port: u16) -> Result<(), AuthError>;
}

/// Terminal output and prompts.
#[async_trait]
pub trait Console: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn success(&self, message: &str);
    /// Whether prompts can be answered.
    fn is_interactive(&self) -> bool;
    /// Wait until the user presses Enter.
    async fn keypress(&self) -> Result<(), AuthError>;
    async fn confirm(&self, message: &str) -> Result<bool, AuthError>;
}

/// Bundle of collaborators handed to the interactive flows.
#[derive(Clone)]
pub struct Host {
    pub browser: Arc<dyn Browser>,
    pub ports: Arc<dyn PortControl>,
    pub console: Arc<dyn Console>,
}

impl Host {
    pub fn system() -> Self {
        Self {
            browser: Arc::new(SystemBrowser),
            ports: Arc::new(SystemPorts),
            console: Arc::new(StdConsole),
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

#[async_trait]
impl Browser for SystemBrowser {
    async fn open_url(&self, url: &str) -> Result<bool, AuthError> {
        let url = url.to_owned();
        let launched = tokio::task::spawn_blocking(move || open::that(url))
            .await
            .map_err(|err| AuthError::BrowserLaunch(err.to_string()))?;
        match launched {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(error = %err, "failed to launch system browser");
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

#[async_trait]
impl PortControl for SystemPorts {
    async fn is_port_free(&self, host: &str, port: u16) -> bool {
        TcpListener::bind((host, port)).await.is_ok()
    }

    async fn kill_process_on_port(&self, port: u16) -> Result<(), AuthError> {
        let output = Command::new("lsof")
            .args(["-ti", &format!("tcp:{port}")])
            .output()
            .await?;
        let pids = String::from_utf8_lossy(&output.stdout);
        for pid in pids.split_whitespace() {
            debug!(pid, port, "terminating process holding redirect port");
            Command::new("kill").args(["-9", pid]).status().await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdConsole;

impl StdConsole {
    async fn read_line() -> Result<String, AuthError> {
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(line)
    }
}

#[async_trait]
impl Console for StdConsole {
    fn info(&self, message: &str) {
        eprintln!("{message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn success(&self, message: &str) {
        eprintln!("✔ {message}");
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
    }

    async fn keypress(&self) -> Result<(), AuthError> {
        Self::read_line().await.map(|_| ())
    }

    async fn confirm(&self, message: &str) -> Result<bool, AuthError> {
        eprint!("{message} [y/N] ");
        let answer = Self::read_line().await?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}
