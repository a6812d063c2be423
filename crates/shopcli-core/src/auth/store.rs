use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::ConfigLocator;

use super::{ApplicationToken, AuthError, Session};

const SESSION_KEY: &str = "session";
const PARTNERS_TOKEN_KEY: &str = "partners-token";

/// Key/value secure storage holding serialized secrets.
pub trait SecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn delete(&self, key: &str) -> Result<(), AuthError>;
}

/// Filesystem-backed secret storage in the user configuration directory.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    locator: ConfigLocator,
}

impl FileSecretStore {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, AuthError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    /// Write through a sibling temp file and rename, so readers never see a partial value.
    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perm = file.metadata()?.permissions();
                perm.set_mode(0o600);
                fs::set_permissions(&tmp, perm)?;
            }

            file.write_all(payload.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        match fs::read_to_string(self.locator.secret_file(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        Self::write_file(&self.locator.secret_file(key), value)
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        match fs::remove_file(self.locator.secret_file(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Session persistence on top of a [`SecretStore`].
///
/// Values that fail to parse or match the schema are deleted and read back as
/// absent, so a damaged cache only ever costs a fresh login.
#[derive(Debug)]
pub struct SessionStore<S> {
    secrets: S,
}

impl<S> SessionStore<S>
where
    S: SecretStore,
{
    pub fn new(secrets: S) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &S {
        &self.secrets
    }

    pub fn fetch(&self) -> Result<Option<Session>, AuthError> {
        self.fetch_json(SESSION_KEY)
    }

    pub fn store(&self, session: &Session) -> Result<(), AuthError> {
        self.secrets
            .set(SESSION_KEY, &serde_json::to_string(session)?)
    }

    /// Delete the session and the override partners token.
    pub fn remove(&self) -> Result<(), AuthError> {
        self.secrets.delete(SESSION_KEY)?;
        self.secrets.delete(PARTNERS_TOKEN_KEY)
    }

    pub fn fetch_partners_token(&self) -> Result<Option<ApplicationToken>, AuthError> {
        self.fetch_json(PARTNERS_TOKEN_KEY)
    }

    pub fn store_partners_token(&self, token: &ApplicationToken) -> Result<(), AuthError> {
        self.secrets
            .set(PARTNERS_TOKEN_KEY, &serde_json::to_string(token)?)
    }

    fn fetch_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AuthError> {
        let Some(raw) = self.secrets.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "discarding unreadable cached credentials");
                self.secrets.delete(key)?;
                Ok(None)
            }
        }
    }
}
