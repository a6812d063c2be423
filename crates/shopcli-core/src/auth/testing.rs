//! In-memory fakes for the collaborator traits.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use super::host::{Browser, Console, PortControl};
use super::partners::PartnersApi;
use super::store::SecretStore;
use super::AuthError;

/// Secret store backed by a shared map; clones see the same values.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemorySecretStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FakeConsole {
    answer: bool,
    interactive: bool,
    messages: Mutex<Vec<String>>,
    keypresses: Mutex<u32>,
}

impl Default for FakeConsole {
    fn default() -> Self {
        Self {
            answer: true,
            interactive: true,
            messages: Mutex::new(Vec::new()),
            keypresses: Mutex::new(0),
        }
    }
}

impl FakeConsole {
    pub(crate) fn answering(answer: bool) -> Self {
        Self {
            answer,
            ..Self::default()
        }
    }

    pub(crate) fn non_interactive() -> Self {
        Self {
            interactive: false,
            ..Self::default()
        }
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn keypresses(&self) -> u32 {
        *self.keypresses.lock().unwrap()
    }
}

#[async_trait]
impl Console for FakeConsole {
    fn info(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_owned());
    }

    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_owned());
    }

    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_owned());
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn keypress(&self) -> Result<(), AuthError> {
        *self.keypresses.lock().unwrap() += 1;
        Ok(())
    }

    async fn confirm(&self, message: &str) -> Result<bool, AuthError> {
        self.messages.lock().unwrap().push(message.to_owned());
        Ok(self.answer)
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeBrowser {
    opened: Mutex<Vec<String>>,
}

impl FakeBrowser {
    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open_url(&self, url: &str) -> Result<bool, AuthError> {
        self.opened.lock().unwrap().push(url.to_owned());
        Ok(true)
    }
}

/// Browser that follows the authorize URL by sending the redirect to the
/// loopback listener with code `the-code`.
#[derive(Debug, Default)]
pub(crate) struct RedirectingBrowser {
    state_override: Option<String>,
    delay: Option<Duration>,
    opened: Mutex<Vec<String>>,
}

impl RedirectingBrowser {
    /// Send `state` instead of the one in the authorize URL.
    pub(crate) fn with_state(state: &str) -> Self {
        Self {
            state_override: Some(state.to_owned()),
            ..Self::default()
        }
    }

    /// Wait `delay` before redirecting.
    pub(crate) fn after(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Browser for RedirectingBrowser {
    async fn open_url(&self, url: &str) -> Result<bool, AuthError> {
        self.opened.lock().unwrap().push(url.to_owned());
        let url = Url::parse(url).unwrap();
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let redirect = Url::parse(&query["redirect_uri"]).unwrap();
        let state = self
            .state_override
            .clone()
            .unwrap_or_else(|| query["state"].clone());
        let addr = format!(
            "{}:{}",
            redirect.host_str().unwrap(),
            redirect.port().unwrap()
        );
        let delay = self.delay;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request =
                format!("GET /?code=the-code&state={state} HTTP/1.1\r\nConnection: close\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf).await;
        });
        Ok(true)
    }
}

#[derive(Debug)]
pub(crate) struct FakePorts {
    free: bool,
    kills: Arc<Mutex<u32>>,
}

impl FakePorts {
    pub(crate) fn free() -> Self {
        Self {
            free: true,
            kills: Arc::default(),
        }
    }

    pub(crate) fn occupied() -> Self {
        Self {
            free: false,
            kills: Arc::default(),
        }
    }

    pub(crate) fn kills(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.kills)
    }
}

#[async_trait]
impl PortControl for FakePorts {
    async fn is_port_free(&self, _host: &str, _port: u16) -> bool {
        self.free
    }

    async fn kill_process_on_port(&self, _port: u16) -> Result<(), AuthError> {
        *self.kills.lock().unwrap() += 1;
        Ok(())
    }
}

/// Partners API with scripted answers. Organization answers are consumed in
/// order and default to `true` once exhausted.
#[derive(Debug, Default)]
pub(crate) struct FakePartners {
    revoked: bool,
    organizations: Mutex<VecDeque<bool>>,
    revocation_checks: Mutex<Vec<String>>,
    organization_checks: Mutex<Vec<String>>,
}

impl FakePartners {
    pub(crate) fn revoked() -> Self {
        Self {
            revoked: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_organizations(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            organizations: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn revocation_checks(&self) -> Vec<String> {
        self.revocation_checks.lock().unwrap().clone()
    }

    pub(crate) fn organization_checks(&self) -> Vec<String> {
        self.organization_checks.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartnersApi for FakePartners {
    async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        self.revocation_checks.lock().unwrap().push(token.to_owned());
        Ok(self.revoked)
    }

    async fn has_organization(&self, token: &str) -> Result<bool, AuthError> {
        self.organization_checks
            .lock()
            .unwrap()
            .push(token.to_owned());
        Ok(self.organizations.lock().unwrap().pop_front().unwrap_or(true))
    }
}
