//! Authentication for autoreply
//!
//! Three pieces behind one credentials shape:
//!
//! - [`vault`] - multi-account storage, OS keyring first, user-only file
//!   fallback, with default-account selection
//! - [`session`] - app-password login and refresh against
//!   `com.atproto.server.*`
//! - [`oauth`] - the authorization-code flow (PAR + PKCE S256, loopback
//!   redirect, per-session DPoP)
//!
//! [`xrpc`] presents whichever token a credentials record carries; callers
//! never branch on the flow that produced it.

pub mod credentials;
pub mod dpop;
pub mod error;
pub mod jose;
pub mod oauth;
pub mod session;
pub mod vault;
pub mod xrpc;

pub use credentials::Credentials;
pub use error::{AuthError, AuthErrorKind, Result};
pub use oauth::{OAuthConfig, OAuthEngine};
pub use session::SessionManager;
pub use vault::CredentialVault;
pub use xrpc::XrpcClient;
