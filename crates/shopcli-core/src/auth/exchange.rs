use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::AuthConfig;

use super::scopes::{api_scopes, scope_uri};
use super::{
    ApplicationToken, Audience, AuthError, AuthRequest, IdentityToken, OAuthErrorCode, PkcePair,
};

const USER_AGENT: &str = concat!("shopcli/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
const GRANT_REFRESH_TOKEN: &str = "refresh_token";
const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Outcome of a grant: the issued token, or the OAuth error code the provider answered with.
pub type Grant<T> = Result<T, OAuthErrorCode>;

/// Authorization code captured from the browser redirect plus the PKCE verifier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAuthResult {
    pub code: String,
    pub code_verifier: String,
}

/// Response of the device authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    pub interval: Option<u64>,
}

/// Performs every call against the identity provider's OAuth endpoints.
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http: Client,
    config: AuthConfig,
}

impl TokenExchanger {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// URL of the provider's authorize page for the browser flow.
    pub fn authorization_url(
        &self,
        scopes: &[String],
        state: &str,
        pkce: &PkcePair,
    ) -> Result<Url, AuthError> {
        let mut url = self.config.identity_endpoint("/oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", self.config.client_id())
            .append_pair("scope", &scopes.join(" "))
            .append_pair("redirect_uri", &self.config.redirect_uri())
            .append_pair("state", state)
            .append_pair("response_type", "code")
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", pkce.challenge());
        Ok(url)
    }

    /// Exchange an authorization code for an identity token.
    pub async fn exchange_code(
        &self,
        code: &CodeAuthResult,
    ) -> Result<Grant<IdentityToken>, AuthError> {
        let params = vec![
            ("grant_type", GRANT_AUTHORIZATION_CODE.to_owned()),
            ("code", code.code.clone()),
            ("redirect_uri", self.config.redirect_uri()),
            ("client_id", self.config.client_id().to_owned()),
            ("code_verifier", code.code_verifier.clone()),
        ];
        match self.token_request(params).await? {
            Ok(payload) => payload.into_identity_token(None).map(Ok),
            Err(code) => Ok(Err(code)),
        }
    }

    /// Refresh an identity token. The previous refresh token is kept when none is returned.
    pub async fn refresh(
        &self,
        current: &IdentityToken,
    ) -> Result<Grant<IdentityToken>, AuthError> {
        let params = vec![
            ("grant_type", GRANT_REFRESH_TOKEN.to_owned()),
            ("access_token", current.access_token.clone()),
            ("refresh_token", current.refresh_token.clone()),
            ("client_id", self.config.client_id().to_owned()),
        ];
        match self.token_request(params).await? {
            Ok(payload) => payload
                .into_identity_token(Some(&current.refresh_token))
                .map(Ok),
            Err(code) => Ok(Err(code)),
        }
    }

    /// Poll the token endpoint once for a device authorization.
    ///
    /// Non-JSON failures are reported as an unknown OAuth code so the poller
    /// can keep waiting through transient outages.
    pub async fn exchange_device_code(
        &self,
        device_code: &str,
    ) -> Result<Grant<IdentityToken>, AuthError> {
        let params = vec![
            ("grant_type", GRANT_DEVICE_CODE.to_owned()),
            ("device_code", device_code.to_owned()),
            ("client_id", self.config.client_id().to_owned()),
        ];
        match self.token_request(params).await {
            Ok(Ok(payload)) => payload.into_identity_token(None).map(Ok),
            Ok(Err(code)) => Ok(Err(code)),
            Err(AuthError::TokenEndpoint { status, .. }) => Ok(Err(OAuthErrorCode::Other(
                format!("http_{}", status.as_u16()),
            ))),
            Err(err) => Err(err),
        }
    }

    /// Exchange `subject_token` for a token scoped to `audience`.
    ///
    /// Returns the applications-map key alongside the token; admin tokens are
    /// keyed by `<store>-<appId>`.
    pub async fn request_application_token(
        &self,
        audience: Audience,
        subject_token: &str,
        scopes: &[String],
        store_fqdn: Option<&str>,
    ) -> Result<Grant<(String, ApplicationToken)>, AuthError> {
        let environment = &self.config.environment;
        let app_id = audience.application_id(environment);
        let mut params = vec![
            ("grant_type", GRANT_TOKEN_EXCHANGE.to_owned()),
            ("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN.to_owned()),
            ("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN.to_owned()),
            ("client_id", self.config.client_id().to_owned()),
            ("audience", app_id.to_owned()),
            ("scope", scopes.join(" ")),
            ("subject_token", subject_token.to_owned()),
        ];
        if let (Audience::Admin, Some(store)) = (audience, store_fqdn) {
            params.push(("destination", format!("https://{store}/admin")));
        }
        let key = audience.token_key(environment, store_fqdn);

        debug!(audience = audience.as_str(), "exchanging identity token for application token");
        Ok(match self.token_request(params).await? {
            Ok(payload) => Ok((key, payload.into_application_token()?)),
            Err(code) => Err(code),
        })
    }

    /// Exchange an identity token for every application token the request needs.
    ///
    /// Partners and storefront-renderer tokens are always refreshed; the admin
    /// token only when a store is requested. Exchanges run concurrently and the
    /// first OAuth error wins.
    pub async fn exchange_application_tokens(
        &self,
        identity: &IdentityToken,
        request: &AuthRequest,
    ) -> Result<Grant<BTreeMap<String, ApplicationToken>>, AuthError> {
        let store = request.admin_store();
        let targets: Vec<(Audience, Vec<String>)> = Audience::ALL
            .iter()
            .filter(|audience| **audience != Audience::Admin || store.is_some())
            .map(|audience| (*audience, api_scopes(*audience, request.scopes_for(*audience))))
            .collect();

        let exchanges = targets.iter().map(|(audience, scopes)| {
            self.request_application_token(*audience, &identity.access_token, scopes, store)
        });
        let results = try_join_all(exchanges).await?;
        Ok(results.into_iter().collect())
    }

    /// Exchange a partners token supplied through the environment.
    pub async fn exchange_custom_partners_token(
        &self,
        token: &str,
    ) -> Result<ApplicationToken, AuthError> {
        let scopes = [scope_uri("cli")];
        match self
            .request_application_token(Audience::Partners, token, &scopes, None)
            .await
        {
            Ok(Ok((_, application))) => Ok(application),
            Ok(Err(_)) | Err(AuthError::TokenEndpoint { .. }) => {
                Err(AuthError::InvalidPartnersToken)
            }
            Err(err) => Err(err),
        }
    }

    /// Start a device authorization.
    pub async fn request_device_authorization(
        &self,
        scopes: &[String],
    ) -> Result<DeviceAuthorization, AuthError> {
        let url = self.config.identity_endpoint("/oauth/device_authorization")?;
        let form = [
            ("client_id", self.config.client_id().to_owned()),
            ("scope", scopes.join(" ")),
        ];
        let response = self.http.post(url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint { status, body });
        }

        let payload: DeviceAuthorizationResponse = serde_json::from_str(&body).map_err(|_| {
            AuthError::InvalidResponse(format!(
                "device authorization returned non-JSON body (HTTP {status})"
            ))
        })?;
        debug!(user_code = %payload.user_code.as_deref().unwrap_or_default(), "received device authorization");
        payload.into_device_authorization()
    }

    async fn token_request(
        &self,
        params: Vec<(&'static str, String)>,
    ) -> Result<Grant<TokenPayload>, AuthError> {
        let url = self.config.identity_endpoint("/oauth/token")?;
        let response = self.http.post(url).form(&params).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Ok(response.json::<TokenPayload>().await?));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorPayload>(&body) {
            Ok(payload) => {
                debug!(status = %status, error = %payload.error, "token endpoint returned an OAuth error");
                Ok(Err(OAuthErrorCode::from(payload.error.as_str())))
            }
            Err(_) => Err(AuthError::TokenEndpoint { status, body }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    #[serde(default)]
    scope: String,
}

impl TokenPayload {
    fn expires_at(&self, received_at: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        if self.expires_in < 0 {
            return Err(AuthError::InvalidResponse("invalid expires_in".into()));
        }
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime))
            .ok_or_else(|| AuthError::InvalidResponse("invalid expires_in".into()))
    }

    fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(ToOwned::to_owned).collect()
    }

    fn into_identity_token(self, previous_refresh: Option<&str>) -> Result<IdentityToken, AuthError> {
        let expires_at = self.expires_at(Utc::now())?;
        let scopes = self.scopes();
        let refresh_token = self
            .refresh_token
            .or_else(|| previous_refresh.map(ToOwned::to_owned))
            .ok_or_else(|| AuthError::InvalidResponse("missing refresh_token".into()))?;
        Ok(IdentityToken {
            access_token: self.access_token,
            refresh_token,
            expires_at,
            scopes,
        })
    }

    fn into_application_token(self) -> Result<ApplicationToken, AuthError> {
        Ok(ApplicationToken {
            expires_at: self.expires_at(Utc::now())?,
            scopes: self.scopes(),
            access_token: self.access_token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    device_code: Option<String>,
    user_code: Option<String>,
    verification_uri: Option<String>,
    verification_uri_complete: Option<String>,
    expires_in: Option<u64>,
    interval: Option<u64>,
}

impl DeviceAuthorizationResponse {
    fn into_device_authorization(self) -> Result<DeviceAuthorization, AuthError> {
        match (self.device_code, self.verification_uri_complete) {
            (Some(device_code), Some(complete)) => Ok(DeviceAuthorization {
                device_code,
                user_code: self.user_code.unwrap_or_default(),
                verification_uri: self.verification_uri.unwrap_or_else(|| complete.clone()),
                verification_uri_complete: Some(complete),
                expires_in: self.expires_in.unwrap_or_default(),
                interval: self.interval,
            }),
            _ => Err(AuthError::InvalidResponse(
                "failed to start device authorization".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use httpmock::prelude::*;
    use reqwest::StatusCode;

    fn exchanger(server: &MockServer) -> TokenExchanger {
        let config = AuthConfig::for_environment(Environment::Production)
            .unwrap()
            .with_identity_url(Url::parse(&server.base_url()).unwrap());
        TokenExchanger::new(config).unwrap()
    }

    fn identity() -> IdentityToken {
        IdentityToken {
            access_token: "identity-access".into(),
            refresh_token: "identity-refresh".into(),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: vec!["openid".into()],
        }
    }

    fn token_body(access: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "refresh_token": "refresh456",
            "expires_in": 3600,
            "scope": "openid custom"
        })
    }

    #[tokio::test]
    async fn exchange_code_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("grant_type", "authorization_code")
                    .x_www_form_urlencoded_tuple("code", "code123")
                    .x_www_form_urlencoded_tuple("code_verifier", "verifier")
                    .x_www_form_urlencoded_tuple("redirect_uri", "http://127.0.0.1:3456");
                then.status(200).json_body_obj(&token_body("abc123"));
            })
            .await;

        let result = exchanger(&server)
            .exchange_code(&CodeAuthResult {
                code: "code123".into(),
                code_verifier: "verifier".into(),
            })
            .await
            .unwrap()
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.access_token, "abc123");
        assert_eq!(result.refresh_token, "refresh456");
        assert_eq!(result.scopes, vec!["openid", "custom"]);
        assert!(result.expires_at > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn refresh_keeps_existing_refresh_token_when_not_returned() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("grant_type", "refresh_token")
                    .x_www_form_urlencoded_tuple("refresh_token", "identity-refresh");
                then.status(200).json_body_obj(&serde_json::json!({
                    "access_token": "new-access",
                    "expires_in": 7200,
                    "scope": "openid"
                }));
            })
            .await;

        let refreshed = exchanger(&server)
            .refresh(&identity())
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.refresh_token, "identity-refresh");
    }

    #[tokio::test]
    async fn oauth_errors_are_returned_as_values() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(400).json_body_obj(&serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "refresh token revoked"
                }));
            })
            .await;

        let outcome = exchanger(&server).refresh(&identity()).await.unwrap();
        assert_eq!(outcome.unwrap_err(), OAuthErrorCode::InvalidGrant);
    }

    #[tokio::test]
    async fn non_json_failures_are_faults() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(502).body("<html>bad gateway</html>");
            })
            .await;

        let err = exchanger(&server).refresh(&identity()).await.unwrap_err();
        match err {
            AuthError::TokenEndpoint { status, body } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert!(body.contains("bad gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_a_fault() {
        for expires_in in [i64::MAX, -1] {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(POST).path("/oauth/token");
                    then.status(200).json_body_obj(&serde_json::json!({
                        "access_token": "abc",
                        "refresh_token": "def",
                        "expires_in": expires_in,
                        "scope": "openid"
                    }));
                })
                .await;

            let err = exchanger(&server)
                .exchange_code(&CodeAuthResult {
                    code: "code".into(),
                    code_verifier: "verifier".into(),
                })
                .await
                .unwrap_err();
            assert!(
                matches!(err, AuthError::InvalidResponse(ref message) if message.contains("expires_in")),
                "unexpected error for {expires_in}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn spin_exchanges_use_development_applications() {
        let server = MockServer::start_async().await;
        let spin = Environment::Spin {
            fqdn: "me.spin.dev".into(),
        };
        let storefront_id = Audience::StorefrontRenderer.application_id(&spin);
        let storefront = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("audience", storefront_id);
                then.status(200).json_body_obj(&token_body("storefront"));
            })
            .await;
        let partners_id = Audience::Partners.application_id(&spin);
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("audience", partners_id);
                then.status(200).json_body_obj(&token_body("partners"));
            })
            .await;
        let config = AuthConfig::for_environment(spin)
            .unwrap()
            .with_identity_url(Url::parse(&server.base_url()).unwrap());

        let tokens = TokenExchanger::new(config)
            .unwrap()
            .exchange_application_tokens(&identity(), &AuthRequest::new().with_partners(["cli"]))
            .await
            .unwrap()
            .unwrap();

        storefront.assert_async().await;
        assert_eq!(tokens[storefront_id].access_token, "storefront");
        assert_eq!(tokens[partners_id].access_token, "partners");
    }

    #[tokio::test]
    async fn device_code_pending_is_a_value_and_outage_is_unknown() {
        let server = MockServer::start_async().await;
        let pending = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("device_code", "pending-code");
                then.status(400)
                    .json_body_obj(&serde_json::json!({"error": "authorization_pending"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("device_code", "outage-code");
                then.status(503).body("unavailable");
            })
            .await;

        let exchanger = exchanger(&server);
        let outcome = exchanger.exchange_device_code("pending-code").await.unwrap();
        pending.assert_async().await;
        assert_eq!(outcome.unwrap_err(), OAuthErrorCode::AuthorizationPending);

        let outcome = exchanger.exchange_device_code("outage-code").await.unwrap();
        assert_eq!(
            outcome.unwrap_err(),
            OAuthErrorCode::Other("http_503".into())
        );
    }

    #[tokio::test]
    async fn admin_token_is_keyed_by_store_and_app_id() {
        let server = MockServer::start_async().await;
        let env = Environment::Production;
        let admin_id = Audience::Admin.application_id(&env);
        let admin = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .x_www_form_urlencoded_tuple("audience", admin_id)
                    .x_www_form_urlencoded_tuple("destination", "https://shop.example.com/admin")
                    .x_www_form_urlencoded_tuple("subject_token", "identity-access");
                then.status(200).json_body_obj(&token_body("admin-token"));
            })
            .await;
        for audience in [Audience::Partners, Audience::StorefrontRenderer] {
            let app_id = audience.application_id(&env);
            server
                .mock_async(|when, then| {
                    when.method(POST)
                        .path("/oauth/token")
                        .x_www_form_urlencoded_tuple("audience", app_id);
                    then.status(200).json_body_obj(&token_body(audience.as_str()));
                })
                .await;
        }

        let request = AuthRequest::new()
            .with_admin("shop.example.com", Vec::<String>::new())
            .with_partners(Vec::<String>::new());
        let tokens = exchanger(&server)
            .exchange_application_tokens(&identity(), &request)
            .await
            .unwrap()
            .unwrap();

        admin.assert_async().await;
        let key = format!("shop.example.com-{admin_id}");
        assert_eq!(tokens[&key].access_token, "admin-token");
        assert!(!tokens.contains_key(admin_id));
        let partners_id = Audience::Partners.application_id(&env);
        assert_eq!(tokens[partners_id].access_token, "partners");
        assert_eq!(tokens.len(), 3);
    }

    #[tokio::test]
    async fn no_admin_exchange_without_store() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(200).json_body_obj(&token_body("app"));
            })
            .await;

        let tokens = exchanger(&server)
            .exchange_application_tokens(&identity(), &AuthRequest::new().with_partners(["cli"]))
            .await
            .unwrap()
            .unwrap();

        mock.assert_hits_async(2).await;
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn invalid_custom_partners_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/token");
                then.status(400)
                    .json_body_obj(&serde_json::json!({"error": "invalid_request"}));
            })
            .await;

        let err = exchanger(&server)
            .exchange_custom_partners_token("bogus")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidPartnersToken));
    }

    #[tokio::test]
    async fn device_authorization_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/device_authorization")
                    .x_www_form_urlencoded_tuple("scope", "openid custom");
                then.status(200).json_body_obj(&serde_json::json!({
                    "device_code": "dev-123",
                    "user_code": "ABCD-EFGH",
                    "verification_uri": "https://accounts.example.com/activate",
                    "verification_uri_complete": "https://accounts.example.com/activate?code=ABCD-EFGH",
                    "expires_in": 600,
                    "interval": 5
                }));
            })
            .await;

        let auth = exchanger(&server)
            .request_device_authorization(&["openid".into(), "custom".into()])
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(auth.device_code, "dev-123");
        assert_eq!(auth.user_code, "ABCD-EFGH");
        assert_eq!(auth.interval, Some(5));
        assert!(auth.verification_uri_complete.is_some());
    }

    #[tokio::test]
    async fn device_authorization_without_device_code_is_a_fault() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/device_authorization");
                then.status(200).json_body_obj(&serde_json::json!({"user_code": "X"}));
            })
            .await;

        let err = exchanger(&server)
            .request_device_authorization(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let config = AuthConfig::for_environment(Environment::Production).unwrap();
        let exchanger = TokenExchanger::new(config).unwrap();
        let pkce = PkcePair::from_verifier("verifier");
        let url = exchanger
            .authorization_url(&["openid".into(), "cli".into()], "state-1", &pkce)
            .unwrap();

        assert_eq!(url.path(), "/oauth/authorize");
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["scope"], "openid cli");
        assert_eq!(pairs["state"], "state-1");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], pkce.challenge());
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:3456");
    }
}
