use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::AuthConfig;

use super::AuthError;

const ORGANIZATIONS_QUERY: &str = r#"
    query CheckOrganizations {
        organizations(first: 1) {
            nodes {
                id
            }
        }
    }
"#;

/// Checks the partners API performs on a partners access token.
#[async_trait]
pub trait PartnersApi: Send + Sync {
    /// Whether the token was revoked server-side.
    async fn is_revoked(&self, token: &str) -> Result<bool, AuthError>;
    /// Whether the account behind the token belongs to a partner organization.
    async fn has_organization(&self, token: &str) -> Result<bool, AuthError>;
}

/// GraphQL client for the partners CLI endpoint.
#[derive(Debug, Clone)]
pub struct PartnersClient {
    http: Client,
    endpoint: Url,
}

impl PartnersClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let endpoint = config.partners_endpoint("/api/cli/graphql")?;
        let http = Client::builder()
            .user_agent(concat!("shopcli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, endpoint })
    }

    async fn organizations_status(&self, token: &str) -> Result<StatusCode, AuthError> {
        #[derive(Serialize)]
        struct RequestBody<'a> {
            query: &'a str,
            variables: (),
        }

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(&RequestBody {
                query: ORGANIZATIONS_QUERY,
                variables: (),
            })
            .send()
            .await?;
        let status = response.status();
        debug!(%status, "partners organizations query");
        Ok(status)
    }
}

#[async_trait]
impl PartnersApi for PartnersClient {
    async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.organizations_status(token).await? == StatusCode::UNAUTHORIZED)
    }

    async fn has_organization(&self, token: &str) -> Result<bool, AuthError> {
        // Only an explicit 404 means no organization; other failures are not conclusive.
        match self.organizations_status(token).await {
            Ok(status) => Ok(status != StatusCode::NOT_FOUND),
            Err(AuthError::Http(err)) => {
                debug!(error = %err, "partners organization check failed");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}
