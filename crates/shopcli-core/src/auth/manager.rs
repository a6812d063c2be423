use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AuthConfig;

use super::authorize::authorize;
use super::device::device_authorize;
use super::exchange::{Grant, TokenExchanger};
use super::partners::{PartnersApi, PartnersClient};
use super::scopes::all_default_scopes;
use super::store::{SecretStore, SessionStore};
use super::validate::{validate_session, ValidationResult};
use super::{
    Audience, AuthError, AuthFlow, AuthRequest, Expiring, FqdnSession, Host, OAuthErrorCode,
};

/// Admin API token together with the store it is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminSession {
    pub token: String,
    pub store_fqdn: String,
}

/// Access tokens for the audiences a command asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OAuthSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partners: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storefront: Option<String>,
}

/// Coordinates validation, interactive flows, refresh, and persistence.
pub struct AuthManager<S> {
    store: SessionStore<S>,
    exchanger: TokenExchanger,
    host: Host,
    partners: Arc<dyn PartnersApi>,
}

impl<S> AuthManager<S>
where
    S: SecretStore,
{
    pub fn new(secrets: S, config: AuthConfig, host: Host) -> Result<Self, AuthError> {
        let partners = Arc::new(PartnersClient::new(&config)?);
        Ok(Self {
            store: SessionStore::new(secrets),
            exchanger: TokenExchanger::new(config)?,
            host,
            partners,
        })
    }

    pub fn with_partners_api(mut self, partners: Arc<dyn PartnersApi>) -> Self {
        self.partners = partners;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        self.exchanger.config()
    }

    /// Return valid tokens for every audience in `request`, logging in or
    /// refreshing as needed. `force_refresh` refreshes even a valid session.
    pub async fn ensure_authenticated(
        &self,
        request: AuthRequest,
        force_refresh: bool,
    ) -> Result<OAuthSession, AuthError> {
        let config = self.config();
        let mut request = request.normalized(&config.environment);
        let mut tokens = OAuthSession::default();

        if let (Some(override_token), true) = (
            config.partners_token.as_deref(),
            request.wants(Audience::Partners),
        ) {
            debug!("using partners token from the environment");
            tokens.partners = Some(self.override_partners_token(override_token).await?);
            request = request.without(Audience::Partners);
            if request.is_empty() {
                self.ensure_partner_organization(tokens.partners.as_deref()).await?;
                return Ok(tokens);
            }
        }

        let fqdn = config.identity_fqdn();
        let requested_scopes = request.identity_scopes();
        let mut session = self.store.fetch()?.unwrap_or_default();
        let current = session.get(&fqdn).cloned();

        let partners_revoked = match (&current, request.wants(Audience::Partners)) {
            (Some(entry), true) => {
                let key = Audience::Partners.token_key(&config.environment, None);
                match entry.applications.get(&key) {
                    Some(token) => self.partners.is_revoked(&token.access_token).await?,
                    None => false,
                }
            }
            _ => false,
        };

        let validation = validate_session(
            &requested_scopes,
            &request,
            current.as_ref(),
            partners_revoked,
            config.refresh_margin,
            &config.environment,
        );
        info!(?validation, force_refresh, "validated cached session");

        let updated = match (validation, current) {
            (ValidationResult::NeedsFullAuth, _) | (_, None) => Some(self.full_auth(&request).await?),
            (ValidationResult::NeedsRefresh, Some(existing)) => {
                Some(self.refresh_or_reauthenticate(existing, &request).await?)
            }
            (ValidationResult::Ok, Some(existing)) if force_refresh => {
                Some(self.refresh_or_reauthenticate(existing, &request).await?)
            }
            (ValidationResult::Ok, Some(_)) => None,
        };
        if let Some(entry) = updated {
            session.insert(fqdn.clone(), entry);
        }
        self.store.store(&session)?;

        let entry = session
            .get(&fqdn)
            .ok_or_else(|| AuthError::Bug(format!("no session stored for {fqdn}")))?;
        self.extract_tokens(entry, &request, &mut tokens);
        self.ensure_partner_organization(tokens.partners.as_deref()).await?;
        Ok(tokens)
    }

    /// Delete every cached credential.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.remove()?;
        info!("removed cached session");
        Ok(())
    }

    async fn full_auth(&self, request: &AuthRequest) -> Result<FqdnSession, AuthError> {
        let config = self.config();
        let mut extra: Vec<String> = request
            .applications()
            .iter()
            .flat_map(|application| application.scopes().iter().cloned())
            .collect();
        if config.first_party_dev {
            extra.push("employee".to_owned());
        }
        let scopes = all_default_scopes(extra);
        info!(flow = %config.flow, "starting interactive login");

        let identity = match config.flow {
            AuthFlow::Browser => {
                let code = authorize(&self.exchanger, &self.host, &scopes, None).await?;
                self.exchanger
                    .exchange_code(&code)
                    .await?
                    .map_err(|code| grant_failure(code, None))?
            }
            AuthFlow::Device => device_authorize(&self.exchanger, &self.host, &scopes).await?,
        };

        let applications = self
            .exchanger
            .exchange_application_tokens(&identity, request)
            .await?
            .map_err(|code| grant_failure(code, request.admin_store()))?;
        self.host.console.success("Logged in.");
        Ok(FqdnSession {
            identity,
            applications,
        })
    }

    async fn refresh_or_reauthenticate(
        &self,
        existing: FqdnSession,
        request: &AuthRequest,
    ) -> Result<FqdnSession, AuthError> {
        match self.refresh(existing, request).await? {
            Ok(entry) => Ok(entry),
            Err(OAuthErrorCode::InvalidGrant) => {
                debug!("refresh token rejected, falling back to full login");
                self.full_auth(request).await
            }
            Err(OAuthErrorCode::InvalidRequest) => {
                self.store.remove()?;
                Err(AuthError::SessionCorrupted)
            }
            Err(code) => Err(grant_failure(code, request.admin_store())),
        }
    }

    /// Refresh the identity token and re-exchange application tokens, keeping
    /// tokens for audiences this request did not touch.
    async fn refresh(
        &self,
        existing: FqdnSession,
        request: &AuthRequest,
    ) -> Result<Grant<FqdnSession>, AuthError> {
        let identity = match self.exchanger.refresh(&existing.identity).await? {
            Ok(identity) => identity,
            Err(code) => return Ok(Err(code)),
        };
        let exchanged = match self
            .exchanger
            .exchange_application_tokens(&identity, request)
            .await?
        {
            Ok(exchanged) => exchanged,
            Err(code) => return Ok(Err(code)),
        };

        let mut applications = existing.applications;
        applications.extend(exchanged);
        debug!("refreshed session");
        Ok(Ok(FqdnSession {
            identity,
            applications,
        }))
    }

    fn extract_tokens(
        &self,
        entry: &FqdnSession,
        request: &AuthRequest,
        tokens: &mut OAuthSession,
    ) {
        let environment = &self.config().environment;
        for application in request.applications() {
            let audience = application.audience();
            let key = audience.token_key(environment, request.admin_store());
            let Some(token) = entry.applications.get(&key) else {
                continue;
            };
            let access_token = token.access_token.clone();
            match audience {
                Audience::Admin => {
                    tokens.admin = request.admin_store().map(|store| AdminSession {
                        token: access_token,
                        store_fqdn: store.to_owned(),
                    });
                }
                Audience::Partners => tokens.partners = Some(access_token),
                Audience::StorefrontRenderer => tokens.storefront = Some(access_token),
            }
        }
    }

    async fn override_partners_token(&self, token: &str) -> Result<String, AuthError> {
        if let Some(cached) = self.store.fetch_partners_token()? {
            if !cached.will_expire_within(self.config().refresh_margin) {
                return Ok(cached.access_token);
            }
        }
        let exchanged = self.exchanger.exchange_custom_partners_token(token).await?;
        self.store.store_partners_token(&exchanged)?;
        Ok(exchanged.access_token)
    }

    /// Guide the user into creating a partner organization when the account has none.
    async fn ensure_partner_organization(&self, token: Option<&str>) -> Result<(), AuthError> {
        let Some(token) = token else {
            return Ok(());
        };
        if self.partners.has_organization(token).await? {
            return Ok(());
        }

        let console = &self.host.console;
        console.info("A Shopify Partners organization is needed to proceed.");
        console.info("Press Enter to create one");
        console.keypress().await?;
        let signup = self.config().partners_endpoint("/signup")?;
        self.host.browser.open_url(signup.as_str()).await?;
        console.info("Press Enter when you have created the organization");
        console.warn("Make sure you've confirmed your Shopify and the Partner organization from the email");
        console.keypress().await?;

        if self.partners.has_organization(token).await? {
            Ok(())
        } else {
            Err(AuthError::MissingPartnerOrganization)
        }
    }
}

fn grant_failure(code: OAuthErrorCode, store: Option<&str>) -> AuthError {
    match (code, store) {
        (OAuthErrorCode::InvalidTarget, Some(store)) => AuthError::StoreAccessDenied {
            store: store.to_owned(),
        },
        (code, _) => AuthError::OAuth(code),
    }
}
