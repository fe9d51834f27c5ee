//! Identifier newtypes: handles and DIDs

use crate::error::{IdentityError, Result};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// A decentralized identifier (`did:plc:...` or `did:web:...`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(SmolStr);

impl Did {
    /// Validate and wrap a DID string
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        if !is_valid_did(s) {
            return Err(IdentityError::invalid_identifier(s));
        }
        Ok(Self(SmolStr::new(s)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The method segment, e.g. `plc` or `web`
    pub fn method(&self) -> &str {
        self.0.as_str().split(':').nth(1).unwrap_or("")
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A DNS-shaped account handle, e.g. `alice.bsky.social`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(SmolStr);

impl Handle {
    /// Validate and wrap a handle string
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        if !is_valid_handle(s) {
            return Err(IdentityError::invalid_identifier(s));
        }
        Ok(Self(SmolStr::new(s.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Either a handle or a DID, parsed from free-form user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtIdentifier {
    Did(Did),
    Handle(Handle),
}

impl AtIdentifier {
    /// Parse an account identifier, accepting a leading `at://` or `@`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input
            .trim()
            .trim_start_matches("at://")
            .trim_start_matches('@');
        if input.starts_with("did:") {
            Ok(AtIdentifier::Did(Did::new(input)?))
        } else {
            Ok(AtIdentifier::Handle(Handle::new(input)?))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AtIdentifier::Did(did) => did.as_str(),
            AtIdentifier::Handle(handle) => handle.as_str(),
        }
    }
}

impl fmt::Display for AtIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Syntactic DID check: `did:<method>:<id>` with a non-empty id
pub fn is_valid_did(s: &str) -> bool {
    let mut parts = s.splitn(3, ':');
    if parts.next() != Some("did") {
        return false;
    }
    let method = match parts.next() {
        Some(m) if !m.is_empty() => m,
        _ => return false,
    };
    let id = match parts.next() {
        Some(i) if !i.is_empty() => i,
        _ => return false,
    };
    method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '%'))
}

/// Syntactic handle check: at least two dot-separated labels, 2+ char TLD
pub fn is_valid_handle(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 || !s.contains('.') {
        return false;
    }
    let labels: Vec<&str> = s.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty()
            || label.len() > 63
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return false;
        }
    }
    labels.last().is_some_and(|tld| tld.len() >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_validation() {
        assert!(is_valid_did("did:plc:abcd1234efgh5678"));
        assert!(is_valid_did("did:web:example.com"));
        assert!(is_valid_did("did:web:example.com:user:alice"));
        assert!(!is_valid_did("did:plc:"));
        assert!(!is_valid_did("did:"));
        assert!(!is_valid_did("not-a-did"));
        assert!(!is_valid_did(""));
    }

    #[test]
    fn handle_validation() {
        assert!(is_valid_handle("alice.bsky.social"));
        assert!(is_valid_handle("user.example.com"));
        assert!(!is_valid_handle("not_a_handle"));
        assert!(!is_valid_handle("bare"));
        assert!(!is_valid_handle(""));
        assert!(!is_valid_handle("handle.c"));
        assert!(!is_valid_handle("-dash.example.com"));
    }

    #[test]
    fn handles_lowercase_on_construction() {
        let h = Handle::new("Alice.BSKY.social").unwrap();
        assert_eq!(h.as_str(), "alice.bsky.social");
    }

    #[test]
    fn identifier_parse_accepts_prefixes() {
        assert!(matches!(
            AtIdentifier::parse("@alice.bsky.social").unwrap(),
            AtIdentifier::Handle(_)
        ));
        assert!(matches!(
            AtIdentifier::parse("at://did:plc:abc123").unwrap(),
            AtIdentifier::Did(_)
        ));
    }

    #[test]
    fn did_method_accessor() {
        let did = Did::new("did:plc:abc123").unwrap();
        assert_eq!(did.method(), "plc");
        let did = Did::new("did:web:example.com").unwrap();
        assert_eq!(did.method(), "web");
    }
}
