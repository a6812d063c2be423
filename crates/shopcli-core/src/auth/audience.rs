use std::str::FromStr;

use crate::config::Environment;

use super::scopes::all_default_scopes;
use super::AuthError;

/// Backend APIs the CLI authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Audience {
    Admin,
    Partners,
    StorefrontRenderer,
}

impl Audience {
    pub const ALL: [Audience; 3] = [
        Audience::Admin,
        Audience::Partners,
        Audience::StorefrontRenderer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Admin => "admin",
            Audience::Partners => "partners",
            Audience::StorefrontRenderer => "storefront-renderer",
        }
    }

    /// Application id the identity provider knows this audience by.
    ///
    /// Local and Spin environments share the development applications.
    pub fn application_id(&self, environment: &Environment) -> &'static str {
        let production = matches!(environment, Environment::Production);
        match (self, production) {
            (Audience::Admin, true) => {
                "7ee65a63608843c577db8b23c4d7316ea0a01bd2f7594f8a9c06ea668c1b775c"
            }
            (Audience::Admin, false) => {
                "e92482cebb9bfb9fb5a0199cc770fde3de6c8d16b798ee73e36c9d815e070e52"
            }
            (Audience::Partners, true) => {
                "271e16d403dfa18082ffb3d197bd2b5f4479c3fc32736d69296829cbb28d41a6"
            }
            (Audience::Partners, false) => {
                "df89d73339ac3c6c5f0a98d9ca93260763e384d51d6038da129889c308973978"
            }
            (Audience::StorefrontRenderer, true) => "ee139b3d-5861-4d45-b387-1bc3ada7811c",
            (Audience::StorefrontRenderer, false) => "46f603de-894f-488d-9471-5b721280ff49",
        }
    }

    /// Key under which this audience's token lives in a session's applications map.
    pub fn token_key(&self, environment: &Environment, store_fqdn: Option<&str>) -> String {
        let app_id = self.application_id(environment);
        match (self, store_fqdn) {
            (Audience::Admin, Some(store)) => format!("{store}-{app_id}"),
            _ => app_id.to_owned(),
        }
    }
}

impl FromStr for Audience {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Audience::Admin),
            "partners" => Ok(Audience::Partners),
            "storefront-renderer" | "storefront" => Ok(Audience::StorefrontRenderer),
            other => Err(AuthError::Bug(format!("unknown audience '{other}'"))),
        }
    }
}

/// One audience requested for the current invocation, with any extra scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationRequest {
    Admin { store_fqdn: String, scopes: Vec<String> },
    Partners { scopes: Vec<String> },
    StorefrontRenderer { scopes: Vec<String> },
}

impl ApplicationRequest {
    pub fn audience(&self) -> Audience {
        match self {
            ApplicationRequest::Admin { .. } => Audience::Admin,
            ApplicationRequest::Partners { .. } => Audience::Partners,
            ApplicationRequest::StorefrontRenderer { .. } => Audience::StorefrontRenderer,
        }
    }

    pub fn scopes(&self) -> &[String] {
        match self {
            ApplicationRequest::Admin { scopes, .. }
            | ApplicationRequest::Partners { scopes }
            | ApplicationRequest::StorefrontRenderer { scopes } => scopes,
        }
    }
}

/// The set of audiences a command needs tokens for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    applications: Vec<ApplicationRequest>,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin<I, S>(self, store_fqdn: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(ApplicationRequest::Admin {
            store_fqdn: store_fqdn.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        })
    }

    pub fn with_partners<I, S>(self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(ApplicationRequest::Partners {
            scopes: scopes.into_iter().map(Into::into).collect(),
        })
    }

    pub fn with_storefront_renderer<I, S>(self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(ApplicationRequest::StorefrontRenderer {
            scopes: scopes.into_iter().map(Into::into).collect(),
        })
    }

    /// Add an audience, replacing an earlier request for the same one.
    pub fn with(mut self, request: ApplicationRequest) -> Self {
        let audience = request.audience();
        self.applications.retain(|existing| existing.audience() != audience);
        self.applications.push(request);
        self
    }

    pub fn applications(&self) -> &[ApplicationRequest] {
        &self.applications
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    pub fn wants(&self, audience: Audience) -> bool {
        self.get(audience).is_some()
    }

    pub fn get(&self, audience: Audience) -> Option<&ApplicationRequest> {
        self.applications
            .iter()
            .find(|request| request.audience() == audience)
    }

    pub fn admin_store(&self) -> Option<&str> {
        self.applications.iter().find_map(|request| match request {
            ApplicationRequest::Admin { store_fqdn, .. } => Some(store_fqdn.as_str()),
            _ => None,
        })
    }

    /// Extra scopes requested for one audience (empty when not requested).
    pub fn scopes_for(&self, audience: Audience) -> &[String] {
        self.get(audience)
            .map(ApplicationRequest::scopes)
            .unwrap_or_default()
    }

    /// Identity scopes covering every requested audience plus all defaults.
    pub fn identity_scopes(&self) -> Vec<String> {
        all_default_scopes(
            self.applications
                .iter()
                .flat_map(|request| request.scopes().iter()),
        )
    }

    pub fn without(mut self, audience: Audience) -> Self {
        self.applications.retain(|request| request.audience() != audience);
        self
    }

    /// Rewrite the admin store name to its canonical fqdn.
    pub fn normalized(mut self, environment: &Environment) -> Self {
        for request in &mut self.applications {
            if let ApplicationRequest::Admin { store_fqdn, .. } = request {
                *store_fqdn = normalize_store_fqdn(store_fqdn, environment);
            }
        }
        self
    }
}

/// Canonical store fqdn: no scheme, no trailing `/` or `/admin`, shop domain appended when bare.
pub fn normalize_store_fqdn(store: &str, environment: &Environment) -> String {
    let trimmed = store.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_slash = without_scheme.trim_end_matches('/');
    let bare = without_slash
        .strip_suffix("/admin")
        .unwrap_or(without_slash)
        .to_ascii_lowercase();

    const QUALIFIED: [&str; 4] = [".myshopify.com", "spin.dev", "shopify.io", ".shop.dev"];
    if QUALIFIED.iter().any(|domain| bare.contains(domain)) {
        bare
    } else {
        format!("{bare}.{}", environment.shop_domain())
    }
}
