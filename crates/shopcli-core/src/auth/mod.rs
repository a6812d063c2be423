//! Identity-provider login, token exchange, and session caching for the
//! admin, partners, and storefront-renderer APIs.

mod audience;
mod authorize;
mod device;
mod error;
mod exchange;
mod flow;
pub mod host;
mod manager;
mod partners;
mod pkce;
mod redirect;
pub mod scopes;
mod session;
mod store;
#[cfg(test)]
mod testing;
mod utils;
mod validate;

pub use audience::{normalize_store_fqdn, ApplicationRequest, Audience, AuthRequest};
pub use authorize::{authorize, check_state};
pub use device::{device_authorize, poll_for_device_authorization};
pub use error::{AuthError, OAuthErrorCode};
pub use exchange::{CodeAuthResult, DeviceAuthorization, Grant, TokenExchanger};
pub use flow::{AuthFlow, InvalidFlow};
pub use host::Host;
pub use manager::{AdminSession, AuthManager, OAuthSession};
pub use partners::{PartnersApi, PartnersClient};
pub use pkce::PkcePair;
pub use redirect::{classify_redirect, RedirectError, RedirectListener, RedirectParams};
pub use session::{ApplicationToken, Expiring, FqdnSession, IdentityToken, Session};
pub use store::{FileSecretStore, SecretStore, SessionStore};
pub use validate::{validate_session, ValidationResult};
