//! Identity resolution for the AT Protocol
//!
//! Handle-to-DID and DID-to-document resolution with the fallback chain
//! used by autoreply's repository provider and OAuth engine.
//!
//! ## Resolution order
//!
//! **Handle → DID**:
//! 1. DNS TXT record at `_atproto.{handle}` (value `did=...`)
//! 2. HTTPS well-known at `https://{handle}/.well-known/atproto-did`
//!
//! **DID → Document**:
//! - `did:plc` → PLC directory (`https://plc.directory/{did}`)
//! - `did:web` → HTTPS well-known `did.json`
//!
//! After a handle resolves, [`IdentityResolver::resolve_identifier`] re-reads
//! the DID document and requires it to claim the handle back; a one-way
//! binding is rejected as a mismatch.

pub mod doc;
pub mod error;
pub mod types;

use crate::doc::DidDocument;
use crate::error::{IdentityError, Result};
use crate::types::{AtIdentifier, Did, Handle};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::ResolverConfig;
use http::StatusCode;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use url::Url;

const DEFAULT_PLC_DIRECTORY: &str = "https://plc.directory/";

/// Options for [`IdentityResolver`]
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Base URL of the PLC directory
    pub plc_directory: Url,
    /// Require `doc.id == did` on every fetched document
    pub validate_doc_id: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            plc_directory: Url::parse(DEFAULT_PLC_DIRECTORY).expect("static URL"),
            validate_doc_id: true,
        }
    }
}

/// A fully resolved account identity: canonical DID, its document, and the
/// PDS authoritative for its records.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub did: Did,
    pub doc: DidDocument,
    pub pds: Url,
}

/// Default resolver implementation
#[derive(Clone)]
pub struct IdentityResolver {
    http: reqwest::Client,
    opts: ResolverOptions,
    dns: Option<Arc<TokioAsyncResolver>>,
}

impl IdentityResolver {
    /// Create a resolver over an existing HTTP client
    pub fn new(http: reqwest::Client, opts: ResolverOptions) -> Self {
        Self {
            http,
            opts,
            dns: None,
        }
    }

    /// Add system-configured DNS TXT resolution
    pub fn with_system_dns(mut self) -> Self {
        self.dns = Some(Arc::new(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            Default::default(),
        )));
        self
    }

    /// Resolve a handle to its DID.
    #[tracing::instrument(level = "debug", skip(self), fields(handle = %handle))]
    pub async fn resolve_handle(&self, handle: &Handle) -> Result<Did> {
        if let Some(did) = self.dns_txt_did(handle).await {
            return Ok(did);
        }
        if let Some(did) = self.well_known_did(handle).await? {
            return Ok(did);
        }
        Err(IdentityError::not_found(handle))
    }

    /// Fetch and parse the DID document for a DID.
    #[tracing::instrument(level = "debug", skip(self), fields(did = %did))]
    pub async fn resolve_did_doc(&self, did: &Did) -> Result<DidDocument> {
        let url = match did.method() {
            "plc" => self.opts.plc_directory.join(did.as_str())?,
            "web" => did_web_url(did)?,
            _ => return Err(IdentityError::unsupported_method(did)),
        };
        let resp = self
            .http
            .get(url)
            .header(http::header::ACCEPT, "application/did+json, application/json")
            .send()
            .await
            .map_err(IdentityError::from)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(IdentityError::not_found(did)),
            status if !status.is_success() => Err(IdentityError::http_status(status)),
            _ => {
                let doc: DidDocument = resp.json().await.map_err(IdentityError::from)?;
                if self.opts.validate_doc_id && doc.id != did.as_str() {
                    return Err(IdentityError::mismatch(did, &doc.id));
                }
                Ok(doc)
            }
        }
    }

    /// Resolve a handle or DID to a canonical identity with PDS endpoint.
    ///
    /// Handles are checked bidirectionally: the resolved document must claim
    /// the handle under `alsoKnownAs` or the binding is rejected.
    #[tracing::instrument(level = "debug", skip(self), fields(identifier = %identifier))]
    pub async fn resolve_identifier(&self, identifier: &AtIdentifier) -> Result<ResolvedIdentity> {
        let (did, doc) = match identifier {
            AtIdentifier::Did(did) => {
                let doc = self.resolve_did_doc(did).await?;
                (did.clone(), doc)
            }
            AtIdentifier::Handle(handle) => {
                let did = self.resolve_handle(handle).await?;
                let doc = self.resolve_did_doc(&did).await?;
                if !doc.claims_handle(handle.as_str()) {
                    return Err(IdentityError::mismatch(handle, &doc.id));
                }
                (did, doc)
            }
        };
        let pds = doc
            .pds_endpoint()
            .ok_or_else(|| IdentityError::missing_pds(&did))?;
        Ok(ResolvedIdentity { did, doc, pds })
    }

    async fn dns_txt_did(&self, handle: &Handle) -> Option<Did> {
        let dns = self.dns.as_ref()?;
        let fqdn = format!("_atproto.{}.", handle.as_str());
        let response = dns.txt_lookup(fqdn).await.ok()?;
        for txt in response.iter() {
            for data in txt.txt_data().iter() {
                let value = String::from_utf8_lossy(data);
                if let Some(did_str) = value.strip_prefix("did=") {
                    if let Ok(did) = Did::new(did_str.trim()) {
                        return Some(did);
                    }
                }
            }
        }
        None
    }

    async fn well_known_did(&self, handle: &Handle) -> Result<Option<Did>> {
        let url = Url::parse(&format!(
            "https://{}/.well-known/atproto-did",
            handle.as_str()
        ))?;
        let resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            // A handle with no web server behind it is a miss, not a failure.
            Err(_) => return Ok(None),
        };
        if resp.status() != StatusCode::OK {
            return Ok(None);
        }
        let body = resp.text().await.map_err(IdentityError::from)?;
        Ok(parse_atproto_did_body(&body))
    }
}

/// Construct the well-known HTTPS URL for a `did:web` DID.
///
/// - `did:web:example.com` → `https://example.com/.well-known/did.json`
/// - `did:web:example.com:user:alice` → `https://example.com/user/alice/did.json`
fn did_web_url(did: &Did) -> Result<Url> {
    let rest = did
        .as_str()
        .strip_prefix("did:web:")
        .ok_or_else(|| IdentityError::unsupported_method(did))?;
    let mut parts = rest.split(':');
    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| IdentityError::unsupported_method(did))?;
    let mut url = Url::parse(&format!("https://{host}/"))?;
    let path: Vec<&str> = parts.collect();
    if path.is_empty() {
        url.set_path(".well-known/did.json");
    } else {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| IdentityError::unsupported_method(did))?;
        for seg in path {
            let decoded = percent_decode_str(seg).decode_utf8_lossy();
            segments.push(&decoded);
        }
        segments.push("did.json");
    }
    Ok(url)
}

fn parse_atproto_did_body(body: &str) -> Option<Did> {
    let line = body.lines().find(|l| !l.trim().is_empty())?;
    Did::new(line.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did(s: &str) -> Did {
        Did::new(s).unwrap()
    }

    #[test]
    fn did_web_urls() {
        assert_eq!(
            did_web_url(&did("did:web:example.com")).unwrap().as_str(),
            "https://example.com/.well-known/did.json"
        );
        assert_eq!(
            did_web_url(&did("did:web:example.com:user:alice"))
                .unwrap()
                .as_str(),
            "https://example.com/user/alice/did.json"
        );
    }

    #[test]
    fn well_known_body_parsing() {
        assert_eq!(
            parse_atproto_did_body("did:plc:abc123\n").unwrap().as_str(),
            "did:plc:abc123"
        );
        assert_eq!(
            parse_atproto_did_body("\n  did:web:example.com  \n")
                .unwrap()
                .as_str(),
            "did:web:example.com"
        );
        assert!(parse_atproto_did_body("").is_none());
        assert!(parse_atproto_did_body("<html>not a did</html>").is_none());
    }

    #[test]
    fn plc_url_join() {
        let opts = ResolverOptions::default();
        let url = opts.plc_directory.join("did:plc:abc123").unwrap();
        assert_eq!(url.as_str(), "https://plc.directory/did:plc:abc123");
    }
}
