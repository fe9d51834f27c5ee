//! Error types for authentication and credential storage

use http::StatusCode;
use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication error with rich diagnostics.
///
/// Context strings never contain token or password material.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct AuthError {
    kind: AuthErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for auth operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// No usable credentials; the caller must log in
    AuthRequired,
    /// The server rejected the presented credentials
    AuthFailed,
    /// Credential store (keyring or file) failed
    Vault,
    /// Requested account is not in the vault
    NotFound,
    /// Identity resolution failed during the auth flow
    Identity,
    /// OAuth `sub` or callback issuer did not match expectations
    IdentityMismatch,
    /// OAuth protocol error (metadata, PAR, token exchange)
    Protocol,
    /// Authorization callback state mismatch
    StateMismatch,
    /// Waited too long for the authorization callback
    CallbackTimeout,
    /// Network-level failure
    Network,
    /// Request deadline exceeded
    Timeout,
    /// Serialization failure
    Serialization,
    /// Caller input rejected before any I/O
    InvalidInput,
    /// Crypto/JOSE failure building proofs
    Crypto,
}

impl AuthError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: AuthErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &AuthErrorKind {
        &self.kind
    }

    // Constructors for different error kinds

    /// Login is required before this operation
    pub fn auth_required() -> Self {
        Self::new(AuthErrorKind::AuthRequired, None)
            .with_help("log in with `autoreply login` first")
    }

    /// Server rejected the credentials
    pub fn auth_failed(status: StatusCode) -> Self {
        Self::new(AuthErrorKind::AuthFailed, None)
            .with_context(format!("server answered {}", status))
    }

    /// Create a vault error
    pub fn vault(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(AuthErrorKind::Vault, Some(Box::new(source)))
    }

    /// Account not present in the vault
    pub fn account_not_found(handle: impl fmt::Display) -> Self {
        Self::new(AuthErrorKind::NotFound, None)
            .with_context(format!("no stored credentials for {}", handle))
    }

    /// OAuth subject or issuer mismatch
    pub fn identity_mismatch(expected: impl fmt::Display, got: impl fmt::Display) -> Self {
        Self::new(AuthErrorKind::IdentityMismatch, None)
            .with_context(format!("expected {}, got {}", expected, got))
    }

    /// OAuth protocol failure
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Protocol, None).with_context(msg.into())
    }

    /// Callback state parameter mismatch
    pub fn state_mismatch() -> Self {
        Self::new(AuthErrorKind::StateMismatch, None)
            .with_help("authorization response did not match the pending request")
    }

    /// Authorization wait expired
    pub fn callback_timeout() -> Self {
        Self::new(AuthErrorKind::CallbackTimeout, None)
            .with_context("no authorization callback within the wait window")
    }

    /// Create a network error
    pub fn network(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(AuthErrorKind::Network, Some(Box::new(source)))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(AuthErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::InvalidInput, None).with_context(msg.into())
    }

    /// Create a crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Crypto, None).with_context(msg.into())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(AuthErrorKind::Timeout, Some(Box::new(e)))
        } else {
            AuthError::network(e)
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::serialization(e)
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        AuthError::new(AuthErrorKind::Serialization, Some(Box::new(e)))
    }
}

impl From<autoreply_identity::error::IdentityError> for AuthError {
    fn from(e: autoreply_identity::error::IdentityError) -> Self {
        use autoreply_identity::error::IdentityErrorKind;
        let kind = match e.kind() {
            IdentityErrorKind::Mismatch => AuthErrorKind::IdentityMismatch,
            IdentityErrorKind::Transport => AuthErrorKind::Network,
            _ => AuthErrorKind::Identity,
        };
        Self::new(kind, Some(Box::new(e)))
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}
