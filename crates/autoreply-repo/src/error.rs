//! Error types for repository operations

use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Archive failed integrity verification
    Corrupt,
    /// Account or record not found
    NotFound,
    /// Identity resolution failed
    Identity,
    /// Handle/DID binding check failed
    IdentityMismatch,
    /// Network-level failure fetching the archive
    Network,
    /// Operation exceeded its deadline
    Timeout,
    /// Filesystem failure in the archive store
    Cache,
    /// Serialization/deserialization failed
    Serialization,
    /// Caller input rejected before any I/O
    InvalidInput,
}

impl RepoError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
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
    pub fn kind(&self) -> &RepoErrorKind {
        &self.kind
    }

    // Constructors for different error kinds

    /// Archive stream ended mid-block
    pub fn corrupt_truncated(offset: u64) -> Self {
        Self::new(RepoErrorKind::Corrupt, None)
            .with_context(format!("truncated at byte {}", offset))
    }

    /// A block's bytes hash to something other than its declared CID
    pub fn corrupt_cid_mismatch(cid: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::Corrupt, None)
            .with_context(format!("block bytes do not match declared CID {}", cid))
    }

    /// A tree node references a CID with no block in the archive
    pub fn corrupt_missing(cid: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::Corrupt, None).with_context(format!("missing block {}", cid))
    }

    /// Archive structure is invalid for reasons beyond a single block
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Corrupt, None).with_context(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create a network error
    pub fn network(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Network, Some(Box::new(source)))
    }

    /// Create a timeout error
    pub fn timeout(what: &str) -> Self {
        Self::new(RepoErrorKind::Timeout, None).with_context(what.to_string())
    }

    /// Create a cache error
    pub fn cache(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Cache, Some(Box::new(source)))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidInput, None).with_context(msg.into())
    }

    /// Wrap a shared error from a coalesced fetch so that every waiter gets
    /// the same kind and message.
    pub fn shared(inner: std::sync::Arc<RepoError>) -> Self {
        Self {
            kind: inner.kind,
            source: Some(Box::new(SharedRepoError(inner))),
            help: None,
            context: None,
        }
    }
}

/// Error wrapper carrying an `Arc`'d failure shared between coalesced callers
#[derive(Debug, Clone)]
struct SharedRepoError(std::sync::Arc<RepoError>);

impl fmt::Display for SharedRepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for SharedRepoError {}

impl From<autoreply_identity::error::IdentityError> for RepoError {
    fn from(e: autoreply_identity::error::IdentityError) -> Self {
        use autoreply_identity::error::IdentityErrorKind;
        let kind = match e.kind() {
            IdentityErrorKind::NotFound => RepoErrorKind::NotFound,
            IdentityErrorKind::Mismatch => RepoErrorKind::IdentityMismatch,
            IdentityErrorKind::InvalidIdentifier => RepoErrorKind::InvalidInput,
            IdentityErrorKind::Transport => RepoErrorKind::Network,
            _ => RepoErrorKind::Identity,
        };
        Self::new(kind, Some(Box::new(e)))
    }
}

impl From<std::io::Error> for RepoError {
    fn from(e: std::io::Error) -> Self {
        RepoError::cache(e)
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::new(RepoErrorKind::Timeout, Some(Box::new(e)))
        } else {
            RepoError::network(e)
        }
    }
}

impl fmt::Display for RepoError {
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
