//! Archive fetching over HTTPS
//!
//! Retrieves `com.atproto.sync.getRepo` archives with conditional request
//! support so a revalidation round trip can finish without a body.

use crate::error::{RepoError, Result};
use autoreply_identity::types::Did;
use futures::StreamExt;
use http::StatusCode;
use http::header;
use std::time::Duration;
use url::Url;

/// Validators remembered from a previous fetch
#[derive(Debug, Clone, Default)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A freshly downloaded archive plus its response validators
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub bytes: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

/// Outcome of a conditional archive fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Server confirmed the cached copy is still current (304)
    NotModified,
    /// New archive bytes were downloaded
    Fetched(FetchedArchive),
}

/// Source of repository archives.
///
/// The HTTP implementation is [`ArchiveFetcher`]; tests substitute counting
/// or canned implementations.
#[trait_variant::make(Send)]
pub trait ArchiveSource {
    async fn fetch_archive(
        &self,
        pds: &Url,
        did: &Did,
        validators: &Validators,
    ) -> Result<FetchOutcome>;
}

/// HTTP archive fetcher with separate metadata and download deadlines
#[derive(Clone)]
pub struct ArchiveFetcher {
    http: reqwest::Client,
    download_timeout: Duration,
}

impl ArchiveFetcher {
    /// Wrap an HTTP client. The client's own timeout covers the
    /// connect/metadata phase; `download_timeout` bounds the whole body read.
    pub fn new(http: reqwest::Client, download_timeout: Duration) -> Self {
        Self {
            http,
            download_timeout,
        }
    }

    fn repo_url(pds: &Url, did: &Did) -> Result<Url> {
        let mut url = pds.clone();
        url.set_path("/xrpc/com.atproto.sync.getRepo");
        url.set_query(Some(&format!("did={}", urlencoding::encode(did.as_str()))));
        Ok(url)
    }
}

impl ArchiveSource for ArchiveFetcher {
    #[tracing::instrument(level = "debug", skip(self, validators), fields(did = %did, pds = %pds))]
    async fn fetch_archive(
        &self,
        pds: &Url,
        did: &Did,
        validators: &Validators,
    ) -> Result<FetchOutcome> {
        let url = Self::repo_url(pds, did)?;
        let mut request = self.http.get(url);
        if let Some(etag) = &validators.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!(did = %did, "archive not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RepoError::not_found("repository", did));
        }
        if !response.status().is_success() {
            return Err(RepoError::network(std::io::Error::other(format!(
                "getRepo returned {}",
                response.status()
            ))));
        }

        let header_str = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let etag = header_str(header::ETAG);
        let last_modified = header_str(header::LAST_MODIFIED);
        let content_length = response.content_length();

        tracing::info!(
            did = %did,
            bytes = content_length.unwrap_or(0),
            "downloading repository archive"
        );

        // The overall body read gets its own deadline, separate from the
        // client-level connect/metadata timeout.
        let body = tokio::time::timeout(self.download_timeout, async {
            let mut bytes = Vec::with_capacity(content_length.unwrap_or(0) as usize);
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                bytes.extend_from_slice(&chunk?);
            }
            Ok::<_, RepoError>(bytes)
        })
        .await
        .map_err(|_| RepoError::timeout("archive download"))??;

        Ok(FetchOutcome::Fetched(FetchedArchive {
            bytes: body,
            etag,
            last_modified,
            content_length,
        }))
    }
}
