//! The single credentials shape shared by both auth flows
//!
//! App-password sessions and OAuth sessions persist the same record; the
//! only difference is the optional DPoP key OAuth negotiates. Storage and
//! tool code never branch on which flow produced a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Stored credentials for one account
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub handle: String,
    pub did: String,
    pub access_token: String,
    pub refresh_token: String,
    pub service_url: Url,
    /// Serialized private JWK when the access token is DPoP-bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_key: Option<String>,
    /// Advisory expiry; absence means "assume expired"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// True when the token is still comfortably inside its advisory
    /// lifetime (more than `leeway` left).
    pub fn fresh_for(&self, leeway: chrono::Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Utc::now() + leeway < expires_at)
    }

    /// True when the access token is DPoP-bound
    pub fn is_dpop_bound(&self) -> bool {
        self.dpop_key.is_some()
    }
}

// Token material must never leak through Debug output or logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("handle", &self.handle)
            .field("did", &self.did)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("service_url", &self.service_url.as_str())
            .field("dpop_key", &self.dpop_key.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            handle: "alice.bsky.social".into(),
            did: "did:plc:abc123".into(),
            access_token: "secret-access-token".into(),
            refresh_token: "secret-refresh-token".into(),
            service_url: Url::parse("https://pds.example").unwrap(),
            dpop_key: Some("{\"kty\":\"EC\"}".into()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(2)),
        }
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", creds());
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(!rendered.contains("kty"));
        assert!(rendered.contains("alice.bsky.social"));
    }

    #[test]
    fn freshness_respects_leeway() {
        let mut c = creds();
        assert!(c.fresh_for(chrono::Duration::minutes(5)));
        c.expires_at = Some(Utc::now() + chrono::Duration::minutes(3));
        assert!(!c.fresh_for(chrono::Duration::minutes(5)));
        c.expires_at = None;
        assert!(!c.fresh_for(chrono::Duration::minutes(5)));
    }

    #[test]
    fn round_trips_through_json() {
        let c = creds();
        let json = serde_json::to_string(&c).unwrap();
        let back: Credentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back.handle, c.handle);
        assert_eq!(back.access_token, c.access_token);
        assert_eq!(back.dpop_key, c.dpop_key);
    }
}
