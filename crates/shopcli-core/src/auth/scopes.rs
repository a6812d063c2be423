//! Scope computation for identity and application tokens.
//!
//! Short scope names are mapped to the canonical URIs the identity provider
//! expects; unknown names pass through untouched.

use std::collections::BTreeSet;

use super::Audience;

const SCOPE_URIS: &[(&str, &str)] = &[
    ("graphql", "https://api.shopify.com/auth/shop.admin.graphql"),
    ("themes", "https://api.shopify.com/auth/shop.admin.themes"),
    (
        "collaborator",
        "https://api.shopify.com/auth/partners.collaborator-relationships.readonly",
    ),
    ("cli", "https://api.shopify.com/auth/partners.app.cli.access"),
    (
        "devtools",
        "https://api.shopify.com/auth/shop.storefront-renderer.devtools",
    ),
    ("employee", "https://api.shopify.com/auth/shop.admin.employee"),
];

pub const OPENID_SCOPE: &str = "openid";

/// Default short scopes for an audience.
pub fn default_scopes(audience: Audience) -> &'static [&'static str] {
    match audience {
        Audience::Admin => &["graphql", "themes", "collaborator"],
        Audience::Partners => &["cli"],
        Audience::StorefrontRenderer => &["devtools"],
    }
}

/// Canonical form of a scope name.
pub fn scope_uri(scope: &str) -> String {
    SCOPE_URIS
        .iter()
        .find(|(name, _)| *name == scope)
        .map(|(_, uri)| (*uri).to_owned())
        .unwrap_or_else(|| scope.to_owned())
}

/// `openid`, every audience's defaults, and `extra`, canonicalized and deduplicated.
pub fn all_default_scopes<I, S>(extra: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let defaults = Audience::ALL
        .iter()
        .flat_map(|audience| default_scopes(*audience).iter().copied())
        .map(scope_uri);
    let mut scopes: BTreeSet<String> = BTreeSet::from([OPENID_SCOPE.to_owned()]);
    scopes.extend(defaults);
    scopes.extend(extra.into_iter().map(|scope| scope_uri(scope.as_ref())));
    scopes.into_iter().collect()
}

/// Defaults for one audience plus `extra`, canonicalized and deduplicated.
pub fn api_scopes<I, S>(audience: Audience, extra: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut scopes: BTreeSet<String> = default_scopes(audience)
        .iter()
        .map(|scope| scope_uri(scope))
        .collect();
    scopes.extend(extra.into_iter().map(|scope| scope_uri(scope.as_ref())));
    scopes.into_iter().collect()
}
