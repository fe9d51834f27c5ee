//! Error types for identity resolution

use http::StatusCode;
use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for identity operations
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Identity resolution error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct IdentityError {
    kind: IdentityErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for identity resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// Handle or DID could not be resolved
    NotFound,
    /// The handle/DID binding failed the bidirectional check
    Mismatch,
    /// Identifier is not a valid handle or DID
    InvalidIdentifier,
    /// DID method has no resolution path here
    UnsupportedMethod,
    /// DID document exists but carries no usable PDS entry
    MissingPds,
    /// Network-level failure (DNS, TCP, TLS)
    Transport,
    /// Unexpected HTTP status from a resolution endpoint
    HttpStatus(StatusCode),
    /// Response body failed to parse
    Parse,
}

impl IdentityError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: IdentityErrorKind, source: Option<BoxError>) -> Self {
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
    pub fn kind(&self) -> &IdentityErrorKind {
        &self.kind
    }

    /// True when the failure was a network transport problem
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, IdentityErrorKind::Transport)
    }

    // Constructors for different error kinds

    /// Create a not found error
    pub fn not_found(identifier: impl fmt::Display) -> Self {
        Self::new(IdentityErrorKind::NotFound, None)
            .with_context(format!("no DID found for {}", identifier))
    }

    /// Create a handle/DID mismatch error
    pub fn mismatch(expected: impl fmt::Display, doc_id: impl fmt::Display) -> Self {
        Self::new(IdentityErrorKind::Mismatch, None)
            .with_context(format!("expected {}, document claims {}", expected, doc_id))
            .with_help("the DID document must advertise the handle bidirectionally")
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(input: impl Into<String>) -> Self {
        Self::new(IdentityErrorKind::InvalidIdentifier, None)
            .with_context(format!("not a handle or DID: {}", input.into()))
    }

    /// Create an unsupported DID method error
    pub fn unsupported_method(did: impl fmt::Display) -> Self {
        Self::new(IdentityErrorKind::UnsupportedMethod, None)
            .with_context(format!("{}", did))
            .with_help("only did:plc and did:web are resolvable")
    }

    /// Create a missing PDS error
    pub fn missing_pds(did: impl fmt::Display) -> Self {
        Self::new(IdentityErrorKind::MissingPds, None)
            .with_context(format!("no AtprotoPersonalDataServer service for {}", did))
    }

    /// Create a transport error
    pub fn transport(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(IdentityErrorKind::Transport, Some(Box::new(source)))
    }

    /// Create an HTTP status error
    pub fn http_status(status: StatusCode) -> Self {
        Self::new(IdentityErrorKind::HttpStatus(status), None)
    }

    /// Create a parse error
    pub fn parse(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(IdentityErrorKind::Parse, Some(Box::new(source)))
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            IdentityError::transport(e)
        } else if let Some(status) = e.status() {
            IdentityError::http_status(status)
        } else {
            IdentityError::transport(e)
        }
    }
}

impl From<url::ParseError> for IdentityError {
    fn from(e: url::ParseError) -> Self {
        IdentityError::new(IdentityErrorKind::Parse, Some(Box::new(e)))
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(e: serde_json::Error) -> Self {
        IdentityError::parse(e)
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IdentityErrorKind::HttpStatus(s) => write!(f, "HttpStatus({})", s)?,
            kind => write!(f, "{:?}", kind)?,
        }

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}
