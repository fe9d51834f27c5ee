//! The stable error taxonomy
//!
//! Every failure crossing the tool boundary carries one of these codes.
//! MCP clients see the code in the JSON-RPC error `data.code`; the CLI maps
//! it to an exit status. Messages never contain tokens or passwords.

use autoreply_auth::error::{AuthError, AuthErrorKind};
use autoreply_identity::error::{IdentityError, IdentityErrorKind};
use autoreply_mcp::{McpError, ToolError};
use autoreply_repo::error::{RepoError, RepoErrorKind};
use std::fmt;

/// Stable failure codes shared by the MCP and CLI surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    IdentityMismatch,
    NetworkFailure,
    Timeout,
    CorruptArchive,
    AuthRequired,
    AuthFailed,
    CacheError,
    Cancelled,
    InitializationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::IdentityMismatch => "IdentityMismatch",
            ErrorCode::NetworkFailure => "NetworkFailure",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::CorruptArchive => "CorruptArchive",
            ErrorCode::AuthRequired => "AuthRequired",
            ErrorCode::AuthFailed => "AuthFailed",
            ErrorCode::CacheError => "CacheError",
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::InitializationFailed => "InitializationFailed",
        }
    }

    /// Parse a stable code string back into the enum (CLI exit mapping)
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "InvalidInput" => ErrorCode::InvalidInput,
            "NotFound" => ErrorCode::NotFound,
            "IdentityMismatch" => ErrorCode::IdentityMismatch,
            "NetworkFailure" => ErrorCode::NetworkFailure,
            "Timeout" => ErrorCode::Timeout,
            "CorruptArchive" => ErrorCode::CorruptArchive,
            "AuthRequired" => ErrorCode::AuthRequired,
            "AuthFailed" => ErrorCode::AuthFailed,
            "CacheError" => ErrorCode::CacheError,
            "Cancelled" => ErrorCode::Cancelled,
            "InitializationFailed" => ErrorCode::InitializationFailed,
            _ => return None,
        })
    }

    /// CLI exit status for this code
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::Cancelled => 0,
            ErrorCode::InvalidInput => 1,
            ErrorCode::NetworkFailure => 2,
            ErrorCode::NotFound => 3,
            ErrorCode::Timeout => 4,
            _ => 5,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error: a taxonomy code plus a safe message
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InitializationFailed, message)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        let code = match e.kind() {
            IdentityErrorKind::NotFound | IdentityErrorKind::MissingPds => ErrorCode::NotFound,
            IdentityErrorKind::Mismatch => ErrorCode::IdentityMismatch,
            IdentityErrorKind::InvalidIdentifier | IdentityErrorKind::UnsupportedMethod => {
                ErrorCode::InvalidInput
            }
            IdentityErrorKind::Transport
            | IdentityErrorKind::HttpStatus(_)
            | IdentityErrorKind::Parse => ErrorCode::NetworkFailure,
        };
        AppError::new(code, e.to_string())
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        let code = match e.kind() {
            RepoErrorKind::Corrupt => ErrorCode::CorruptArchive,
            RepoErrorKind::NotFound => ErrorCode::NotFound,
            RepoErrorKind::IdentityMismatch => ErrorCode::IdentityMismatch,
            RepoErrorKind::Identity | RepoErrorKind::Network => ErrorCode::NetworkFailure,
            RepoErrorKind::Timeout => ErrorCode::Timeout,
            RepoErrorKind::Cache | RepoErrorKind::Serialization => ErrorCode::CacheError,
            RepoErrorKind::InvalidInput => ErrorCode::InvalidInput,
        };
        AppError::new(code, e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        let code = match e.kind() {
            AuthErrorKind::AuthRequired => ErrorCode::AuthRequired,
            AuthErrorKind::AuthFailed
            | AuthErrorKind::Protocol
            | AuthErrorKind::StateMismatch
            | AuthErrorKind::Crypto => ErrorCode::AuthFailed,
            AuthErrorKind::Vault => ErrorCode::CacheError,
            AuthErrorKind::NotFound => ErrorCode::NotFound,
            AuthErrorKind::IdentityMismatch => ErrorCode::IdentityMismatch,
            AuthErrorKind::Identity
            | AuthErrorKind::Network
            | AuthErrorKind::Serialization => ErrorCode::NetworkFailure,
            AuthErrorKind::Timeout => ErrorCode::Timeout,
            AuthErrorKind::CallbackTimeout => ErrorCode::Timeout,
            AuthErrorKind::InvalidInput => ErrorCode::InvalidInput,
        };
        AppError::new(code, e.to_string())
    }
}

impl From<McpError> for AppError {
    fn from(e: McpError) -> Self {
        let code = match e {
            McpError::Cancelled => ErrorCode::Cancelled,
            _ => ErrorCode::NetworkFailure,
        };
        AppError::new(code, e.to_string())
    }
}

impl From<AppError> for ToolError {
    fn from(e: AppError) -> Self {
        ToolError::new(e.code.as_str(), e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(ErrorCode::InvalidInput.exit_code(), 1);
        assert_eq!(ErrorCode::NetworkFailure.exit_code(), 2);
        assert_eq!(ErrorCode::NotFound.exit_code(), 3);
        assert_eq!(ErrorCode::Timeout.exit_code(), 4);
        assert_eq!(ErrorCode::CorruptArchive.exit_code(), 5);
        assert_eq!(ErrorCode::AuthRequired.exit_code(), 5);
        assert_eq!(ErrorCode::Cancelled.exit_code(), 0);
    }

    #[test]
    fn repo_errors_map_to_taxonomy() {
        let e: AppError = RepoError::corrupt_cid_mismatch("bafyx").into();
        assert_eq!(e.code, ErrorCode::CorruptArchive);
        let e: AppError = RepoError::invalid_input("bad query").into();
        assert_eq!(e.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn auth_errors_map_to_taxonomy() {
        let e: AppError = AuthError::auth_required().into();
        assert_eq!(e.code, ErrorCode::AuthRequired);
        let e: AppError = AuthError::callback_timeout().into();
        assert_eq!(e.code, ErrorCode::Timeout);
        let e: AppError = AuthError::identity_mismatch("did:plc:a", "did:plc:b").into();
        assert_eq!(e.code, ErrorCode::IdentityMismatch);
    }

    #[test]
    fn tool_error_carries_stable_code() {
        let tool_err: ToolError = AppError::not_found("no such account").into();
        assert_eq!(tool_err.code, "NotFound");
    }
}
