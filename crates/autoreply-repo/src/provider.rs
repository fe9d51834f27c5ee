//! Repository provider
//!
//! The single entry point downstream tools use: identifier in, decoded
//! repository out. Handles identity resolution, cache freshness, conditional
//! refetch, atomic persistence, and decoding, with concurrent requests for
//! the same DID coalesced onto one fetch.

use crate::error::{RepoError, RepoErrorKind, Result};
use crate::fetch::{ArchiveSource, FetchOutcome, Validators};
use crate::repo::Repo;
use crate::store::{ArchiveStore, CacheMetadata};
use autoreply_identity::types::{AtIdentifier, Did};
use autoreply_identity::{IdentityResolver, ResolvedIdentity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use url::Url;

/// Identity lookups the provider needs.
///
/// The production implementation is [`IdentityResolver`]; tests substitute
/// a canned directory.
#[trait_variant::make(Send)]
pub trait IdentityDirectory {
    /// Canonicalize an identifier to a DID (with the bidirectional binding
    /// check when the input is a handle).
    async fn canonical_did(&self, identifier: &AtIdentifier) -> Result<Did>;

    /// The PDS endpoint authoritative for a DID
    async fn pds_for(&self, did: &Did) -> Result<Url>;
}

impl IdentityDirectory for IdentityResolver {
    async fn canonical_did(&self, identifier: &AtIdentifier) -> Result<Did> {
        match identifier {
            AtIdentifier::Did(did) => Ok(did.clone()),
            AtIdentifier::Handle(_) => {
                let ResolvedIdentity { did, .. } = self.resolve_identifier(identifier).await?;
                Ok(did)
            }
        }
    }

    async fn pds_for(&self, did: &Did) -> Result<Url> {
        let doc = self.resolve_did_doc(did).await?;
        doc.pds_endpoint()
            .ok_or_else(|| RepoError::not_found("PDS endpoint", did))
    }
}

type SharedOutcome = std::result::Result<Arc<Repo>, Arc<RepoError>>;

/// Orchestrates identity resolution, cache, fetch, and decode behind
/// `get_repo`.
pub struct RepoProvider<D, F> {
    identity: D,
    fetcher: F,
    store: ArchiveStore,
    ttl_hours: u64,
    inflight: Mutex<HashMap<String, broadcast::Sender<SharedOutcome>>>,
}

enum Flight {
    Run(broadcast::Sender<SharedOutcome>),
    Wait(broadcast::Receiver<SharedOutcome>),
}

impl<D, F> RepoProvider<D, F>
where
    D: IdentityDirectory + Sync,
    F: ArchiveSource + Sync,
{
    pub fn new(identity: D, fetcher: F, store: ArchiveStore, ttl_hours: u64) -> Self {
        Self {
            identity,
            fetcher,
            store,
            ttl_hours,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Resolve an identifier and return its decoded repository.
    ///
    /// Concurrent calls for the same DID share one fetch-and-decode; every
    /// caller observes the same success or failure.
    #[tracing::instrument(level = "debug", skip(self), fields(identifier = %identifier))]
    pub async fn get_repo(&self, identifier: &AtIdentifier) -> Result<Arc<Repo>> {
        self.get_repo_with_max_age(identifier, None).await
    }

    /// Like [`get_repo`](Self::get_repo), but treats cache entries older
    /// than `max_age_hours` as stale even when their stored TTL has not
    /// expired. Coalesced callers share the parameters of whichever call
    /// started the flight.
    pub async fn get_repo_with_max_age(
        &self,
        identifier: &AtIdentifier,
        max_age_hours: Option<u64>,
    ) -> Result<Arc<Repo>> {
        let did = self.identity.canonical_did(identifier).await?;

        let flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(did.as_str()) {
                Some(tx) => Flight::Wait(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(did.as_str().to_string(), tx.clone());
                    Flight::Run(tx)
                }
            }
        };

        match flight {
            Flight::Wait(mut rx) => match rx.recv().await {
                Ok(Ok(repo)) => Ok(repo),
                Ok(Err(shared)) => Err(RepoError::shared(shared)),
                Err(_) => Err(RepoError::network(std::io::Error::other(
                    "coalesced fetch dropped before completing",
                ))),
            },
            Flight::Run(tx) => {
                let outcome = self.load(&did, max_age_hours).await.map_err(Arc::new);
                self.inflight.lock().await.remove(did.as_str());
                let _ = tx.send(outcome.clone());
                outcome.map_err(RepoError::shared)
            }
        }
    }

    async fn load(&self, did: &Did, max_age_hours: Option<u64>) -> Result<Arc<Repo>> {
        if self.store.is_fresh_within(did.as_str(), max_age_hours).await {
            tracing::debug!(did = %did, "serving repository from cache");
            let bytes = self.store.read_archive(did.as_str()).await?;
            return self.decode_cached(did, &bytes).await;
        }

        let pds = self.identity.pds_for(did).await?;
        let validators = self
            .store
            .metadata(did.as_str())
            .await
            .map(|m| Validators {
                etag: m.etag,
                last_modified: m.last_modified,
            })
            .unwrap_or_default();

        match self.fetcher.fetch_archive(&pds, did, &validators).await? {
            FetchOutcome::NotModified => {
                self.store.touch(did.as_str()).await?;
                let bytes = self.store.read_archive(did.as_str()).await?;
                self.decode_cached(did, &bytes).await
            }
            FetchOutcome::Fetched(fetched) => {
                // Decode before persisting so a corrupt download never
                // replaces a cache entry.
                let repo = self.decode(&fetched.bytes).await?;
                let metadata = CacheMetadata::new(did.as_str(), self.ttl_hours).with_validators(
                    fetched.etag,
                    fetched.last_modified,
                    fetched.content_length,
                );
                if let Err(e) = self.store.store(&fetched.bytes, &metadata).await {
                    tracing::warn!(did = %did, error = %e, "cache persist failed, serving from memory");
                }
                Ok(repo)
            }
        }
    }

    /// Decode bytes read back from the cache; a corrupt entry is evicted so
    /// the next call fetches instead of looping on bad data.
    async fn decode_cached(&self, did: &Did, bytes: &[u8]) -> Result<Arc<Repo>> {
        match self.decode(bytes).await {
            Ok(repo) => Ok(repo),
            Err(e) if *e.kind() == RepoErrorKind::Corrupt => {
                tracing::warn!(did = %did, error = %e, "evicting corrupt cache entry");
                let _ = self.store.evict(did.as_str()).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn decode(&self, bytes: &[u8]) -> Result<Arc<Repo>> {
        let archive = crate::car::parse_archive(bytes).await?;
        let repo = Repo::decode(&archive)?;
        Ok(Arc::new(repo))
    }
}
