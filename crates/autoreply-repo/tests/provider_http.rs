//! Provider scenarios over a real HTTP stub PDS
//!
//! A rouille server plays the PDS: it serves a small CAR archive with one
//! profile record and honours `If-None-Match` with a 304. The provider is
//! wired with a canned identity directory so no real resolution happens.

use autoreply_identity::types::{AtIdentifier, Did};
use autoreply_repo::fetch::ArchiveFetcher;
use autoreply_repo::provider::{IdentityDirectory, RepoProvider};
use autoreply_repo::records::{RecordValue, collections};
use autoreply_repo::store::{ArchiveStore, CacheMetadata};
use autoreply_repo::{Result, error::RepoError};
use cid::Cid;
use ipld_core::ipld::Ipld;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

const DID: &str = "did:plc:abc";
const ETAG: &str = "W/\"v1\"";

// Local CAR construction: varint-framed header block, then cid||data blocks.

fn varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            return out;
        }
    }
}

fn encode_block<T: Serialize>(value: &T) -> (Cid, Vec<u8>) {
    let bytes = serde_ipld_dagcbor::to_vec(value).unwrap();
    let digest = Sha256::digest(&bytes);
    let mh = multihash::Multihash::wrap(0x12, &digest).unwrap();
    (Cid::new_v1(0x71, mh), bytes)
}

fn ipld_map(pairs: Vec<(&str, Ipld)>) -> Ipld {
    Ipld::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// One-record archive: a profile with `displayName: "Alice"`
fn profile_car() -> Vec<u8> {
    let (value_cid, value_bytes) = encode_block(&ipld_map(vec![
        ("$type", Ipld::String(collections::PROFILE.into())),
        ("displayName", Ipld::String("Alice".into())),
    ]));
    let (root_cid, root_bytes) = encode_block(&ipld_map(vec![
        ("l", Ipld::Null),
        (
            "e",
            Ipld::List(vec![ipld_map(vec![
                (
                    "k",
                    Ipld::Bytes(b"app.bsky.actor.profile/self".to_vec()),
                ),
                ("p", Ipld::Integer(0)),
                ("t", Ipld::Null),
                ("v", Ipld::Link(value_cid)),
            ])]),
        ),
    ]));
    let (commit_cid, commit_bytes) = encode_block(&ipld_map(vec![
        ("did", Ipld::String(DID.into())),
        ("version", Ipld::Integer(3)),
        ("data", Ipld::Link(root_cid)),
        ("rev", Ipld::String("3jzfcijpj2z2a".into())),
        ("prev", Ipld::Null),
        ("sig", Ipld::Bytes(vec![0u8; 64])),
    ]));

    let header = ipld_map(vec![
        ("roots", Ipld::List(vec![Ipld::Link(commit_cid)])),
        ("version", Ipld::Integer(1)),
    ]);
    let header_bytes = serde_ipld_dagcbor::to_vec(&header).unwrap();

    let mut car = Vec::new();
    car.extend(varint(header_bytes.len() as u64));
    car.extend(header_bytes);
    for (cid, data) in [
        (commit_cid, commit_bytes),
        (root_cid, root_bytes),
        (value_cid, value_bytes),
    ] {
        let cid_bytes = cid.to_bytes();
        car.extend(varint((cid_bytes.len() + data.len()) as u64));
        car.extend(cid_bytes);
        car.extend(data);
    }
    car
}

struct StubPds {
    url: Url,
    full_fetches: Arc<AtomicUsize>,
    revalidations: Arc<AtomicUsize>,
}

fn start_stub_pds() -> StubPds {
    let full_fetches = Arc::new(AtomicUsize::new(0));
    let revalidations = Arc::new(AtomicUsize::new(0));
    let full = full_fetches.clone();
    let reval = revalidations.clone();
    let car = profile_car();
    let server = rouille::Server::new("127.0.0.1:0", move |request| {
        if request.url() != "/xrpc/com.atproto.sync.getRepo" {
            return rouille::Response::empty_404();
        }
        if request.header("If-None-Match") == Some(ETAG) {
            reval.fetch_add(1, Ordering::SeqCst);
            return rouille::Response::empty_204().with_status_code(304);
        }
        full.fetch_add(1, Ordering::SeqCst);
        rouille::Response::from_data("application/vnd.ipld.car", car.clone())
            .with_additional_header("ETag", ETAG)
    })
    .expect("stub PDS");
    let url = Url::parse(&format!("http://{}", server.server_addr())).unwrap();
    let (_handle, stop) = server.stoppable();
    std::mem::forget(stop);
    StubPds {
        url,
        full_fetches,
        revalidations,
    }
}

/// Canned identity: the handle resolves to a fixed DID, the DID lives on
/// the stub PDS.
struct StubDirectory {
    pds: Url,
}

impl IdentityDirectory for StubDirectory {
    async fn canonical_did(&self, identifier: &AtIdentifier) -> Result<Did> {
        match identifier {
            AtIdentifier::Did(did) => Ok(did.clone()),
            AtIdentifier::Handle(_) => Ok(Did::new(DID).unwrap()),
        }
    }

    async fn pds_for(&self, _did: &Did) -> Result<Url> {
        Ok(self.pds.clone())
    }
}

fn provider(
    pds: Url,
    root: &TempDir,
) -> RepoProvider<StubDirectory, ArchiveFetcher> {
    let http = reqwest::Client::new();
    RepoProvider::new(
        StubDirectory { pds },
        ArchiveFetcher::new(http, Duration::from_secs(60)),
        ArchiveStore::new(root.path()),
        24,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handle_resolves_and_profile_round_trips() {
    let stub = start_stub_pds();
    let root = TempDir::new().unwrap();
    let provider = provider(stub.url.clone(), &root);

    let identifier = AtIdentifier::parse("alice.bsky.social").unwrap();
    let repo = provider.get_repo(&identifier).await.unwrap();

    assert_eq!(repo.did().as_str(), DID);
    let profile = repo.records_of(collections::PROFILE).next().unwrap();
    match &profile.value {
        RecordValue::Profile(profile) => {
            assert_eq!(profile.display_name.as_deref(), Some("Alice"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    // Cache lands under the two-character shard of the sanitized DID.
    let archive = root.path().join("ab").join("abc").join("archive.bin");
    assert!(archive.exists(), "expected {}", archive.display());
    assert_eq!(stub.full_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_entry_revalidates_with_304_and_no_body() {
    let stub = start_stub_pds();
    let root = TempDir::new().unwrap();
    let provider = provider(stub.url.clone(), &root);

    // Pre-populate an expired cache entry carrying the known validator.
    let mut meta = CacheMetadata::new(DID, 24).with_validators(Some(ETAG.into()), None, None);
    meta.cached_at = chrono::Utc::now() - chrono::Duration::hours(48);
    provider.store().store(&profile_car(), &meta).await.unwrap();
    assert!(!provider.store().is_fresh(DID).await);

    let identifier = AtIdentifier::parse(DID).unwrap();
    let repo = provider.get_repo(&identifier).await.unwrap();
    assert_eq!(repo.records_of(collections::PROFILE).count(), 1);

    // The conditional request was answered 304: no full body was served,
    // and the entry's cached_at was refreshed.
    assert_eq!(stub.full_fetches.load(Ordering::SeqCst), 0);
    assert_eq!(stub.revalidations.load(Ordering::SeqCst), 1);
    assert!(provider.store().is_fresh(DID).await);

    let refreshed = provider.store().metadata(DID).await.unwrap();
    assert!(refreshed.cached_at > meta.cached_at);
    assert_eq!(refreshed.etag.as_deref(), Some(ETAG));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tampered_archive_is_rejected_before_caching() {
    // A stub that serves a corrupted body: last block byte flipped.
    let mut car = profile_car();
    let len = car.len();
    car[len - 1] ^= 0xff;
    let server = rouille::Server::new("127.0.0.1:0", move |_request| {
        rouille::Response::from_data("application/vnd.ipld.car", car.clone())
    })
    .expect("stub PDS");
    let url = Url::parse(&format!("http://{}", server.server_addr())).unwrap();
    let (_handle, stop) = server.stoppable();
    std::mem::forget(stop);

    let root = TempDir::new().unwrap();
    let provider = provider(url, &root);
    let identifier = AtIdentifier::parse(DID).unwrap();
    let err: RepoError = provider.get_repo(&identifier).await.unwrap_err();
    assert_eq!(
        *err.kind(),
        autoreply_repo::RepoErrorKind::Corrupt,
        "got: {err}"
    );
    assert!(provider.store().metadata(DID).await.is_none());
}
