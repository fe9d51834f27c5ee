//! CAR archive parsing with integrity verification
//!
//! Parses the self-describing block stream, re-hashes every block against
//! its declared CID, and decodes the commit object the header's root points
//! at. Everything downstream (MST walk, record decoding) works off the block
//! map produced here.

use crate::error::{RepoError, Result};
use bytes::Bytes;
use cid::Cid;
use iroh_car::CarReader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Multihash code for SHA2-256
pub const SHA2_256: u64 = 0x12;
/// CID codec for DAG-CBOR
pub const DAG_CBOR: u64 = 0x71;

/// Signed commit object at the root of a repository archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Repository DID
    pub did: String,
    /// Commit version (2 or 3)
    pub version: i64,
    /// MST root CID
    pub data: Cid,
    /// Revision TID
    pub rev: String,
    /// Previous commit CID (always present in the wire shape, often null)
    pub prev: Option<Cid>,
    /// Signature bytes
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
}

/// Fully parsed archive: verified blocks plus the decoded commit
#[derive(Debug, Clone)]
pub struct ParsedArchive {
    /// Root CID from the CAR header
    pub root: Cid,
    /// Decoded commit block
    pub commit: Commit,
    /// All blocks, hash-verified
    pub blocks: BTreeMap<Cid, Bytes>,
}

impl ParsedArchive {
    /// Look up a block, failing with a dangling-reference error
    pub fn block(&self, cid: &Cid) -> Result<&Bytes> {
        self.blocks
            .get(cid)
            .ok_or_else(|| RepoError::corrupt_missing(cid))
    }
}

/// Parse archive bytes into a verified block map and commit.
///
/// Every block is re-hashed; a mismatch or a truncated stream rejects the
/// whole archive. The header must carry exactly one root, and that root must
/// decode as a commit.
pub async fn parse_archive(data: &[u8]) -> Result<ParsedArchive> {
    let position = Arc::new(AtomicU64::new(0));
    let reader = CountingReader::new(data, position.clone());
    let truncated = |_| RepoError::corrupt_truncated(position.load(Ordering::Relaxed));

    let reader = CarReader::new(reader).await.map_err(truncated)?;
    let roots = reader.header().roots().to_vec();
    let root = match roots.as_slice() {
        [root] => *root,
        [] => return Err(RepoError::corrupt("archive has no root CID")),
        _ => return Err(RepoError::corrupt("archive has multiple root CIDs")),
    };

    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    futures::pin_mut!(stream);
    while let Some(result) = futures::StreamExt::next(&mut stream).await {
        let (cid, data) = result.map_err(truncated)?;
        verify_block(&cid, &data)?;
        blocks.insert(cid, Bytes::from(data));
    }

    let commit_bytes = blocks
        .get(&root)
        .ok_or_else(|| RepoError::corrupt_missing(&root))?;
    let commit: Commit = serde_ipld_dagcbor::from_slice(commit_bytes)
        .map_err(|e| RepoError::corrupt(format!("root is not a commit: {e}")))?;
    if !(2..=3).contains(&commit.version) {
        return Err(RepoError::corrupt(format!(
            "unsupported commit version {}",
            commit.version
        )));
    }

    Ok(ParsedArchive {
        root,
        commit,
        blocks,
    })
}

/// Verify that a block's bytes hash to its declared CID
pub fn verify_block(cid: &Cid, data: &[u8]) -> Result<()> {
    let mh = cid.hash();
    if mh.code() != SHA2_256 {
        return Err(
            RepoError::corrupt_cid_mismatch(cid).with_help("only sha2-256 CIDs are verifiable")
        );
    }
    let digest = Sha256::digest(data);
    if mh.digest() != digest.as_slice() {
        return Err(RepoError::corrupt_cid_mismatch(cid));
    }
    Ok(())
}

/// Compute the DAG-CBOR CIDv1 for a block of canonical bytes
pub fn compute_cid(data: &[u8]) -> Cid {
    let digest = Sha256::digest(data);
    let mh = multihash::Multihash::wrap(SHA2_256, &digest).expect("sha2-256 digest fits");
    Cid::new_v1(DAG_CBOR, mh)
}

/// `AsyncRead` adapter that tracks how far into the stream we got, so
/// truncation errors can report a byte offset.
struct CountingReader<'a> {
    inner: &'a [u8],
    position: Arc<AtomicU64>,
}

impl<'a> CountingReader<'a> {
    fn new(inner: &'a [u8], position: Arc<AtomicU64>) -> Self {
        Self { inner, position }
    }
}

impl AsyncRead for CountingReader<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = (buf.filled().len() - before) as u64;
            self.position.fetch_add(read, Ordering::Relaxed);
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Hand-rolled CAR writer for decoder tests.
    //!
    //! Produces v1 CAR bytes: varint-framed header block, then
    //! varint-framed `cid || data` blocks.

    use super::*;
    use ipld_core::ipld::Ipld;

    pub fn varint(mut value: u64) -> Vec<u8> {
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

    /// Serialize a CAR v1 file from explicit roots and (cid, bytes) blocks
    pub fn write_car(roots: &[Cid], blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
        let header = Ipld::Map(
            [
                (
                    "roots".to_string(),
                    Ipld::List(roots.iter().map(|c| Ipld::Link(*c)).collect()),
                ),
                ("version".to_string(), Ipld::Integer(1)),
            ]
            .into_iter()
            .collect(),
        );
        let header_bytes = serde_ipld_dagcbor::to_vec(&header).unwrap();

        let mut out = Vec::new();
        out.extend(varint(header_bytes.len() as u64));
        out.extend(header_bytes);
        for (cid, data) in blocks {
            let cid_bytes = cid.to_bytes();
            out.extend(varint((cid_bytes.len() + data.len()) as u64));
            out.extend(cid_bytes);
            out.extend(data);
        }
        out
    }

    /// Encode a value as DAG-CBOR and return `(cid, bytes)`
    pub fn encode_block<T: serde::Serialize>(value: &T) -> (Cid, Vec<u8>) {
        let bytes = serde_ipld_dagcbor::to_vec(value).unwrap();
        (compute_cid(&bytes), bytes)
    }

    /// A minimal commit block pointing at the given MST root
    pub fn commit_block(did: &str, data: Cid) -> (Cid, Vec<u8>) {
        let commit = Commit {
            did: did.to_string(),
            version: 3,
            data,
            rev: "3jzfcijpj2z2a".to_string(),
            prev: None,
            sig: vec![0u8; 64],
        };
        encode_block(&commit)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::error::RepoErrorKind;

    #[tokio::test]
    async fn parses_verified_archive() {
        let (record_cid, record_bytes) = encode_block(&ipld_core::ipld::Ipld::Map(
            [("x".to_string(), ipld_core::ipld::Ipld::Integer(1))]
                .into_iter()
                .collect(),
        ));
        let (commit_cid, commit_bytes) = commit_block("did:plc:abc", record_cid);
        let car = write_car(
            &[commit_cid],
            &[
                (commit_cid, commit_bytes),
                (record_cid, record_bytes.clone()),
            ],
        );

        let parsed = parse_archive(&car).await.unwrap();
        assert_eq!(parsed.root, commit_cid);
        assert_eq!(parsed.commit.did, "did:plc:abc");
        assert_eq!(parsed.commit.data, record_cid);
        assert_eq!(parsed.block(&record_cid).unwrap().as_ref(), &record_bytes);
    }

    #[tokio::test]
    async fn rejects_tampered_block() {
        let (record_cid, record_bytes) = encode_block(&ipld_core::ipld::Ipld::String("v".into()));
        let (commit_cid, mut commit_bytes) = commit_block("did:plc:abc", record_cid);
        // Flip a byte inside the commit so its stored CID no longer matches.
        let last = commit_bytes.len() - 1;
        commit_bytes[last] ^= 0xff;
        let car = write_car(
            &[commit_cid],
            &[(commit_cid, commit_bytes), (record_cid, record_bytes)],
        );

        let err = parse_archive(&car).await.unwrap_err();
        assert_eq!(*err.kind(), RepoErrorKind::Corrupt);
    }

    #[tokio::test]
    async fn rejects_truncated_stream() {
        let (record_cid, record_bytes) = encode_block(&ipld_core::ipld::Ipld::String("v".into()));
        let (commit_cid, commit_bytes) = commit_block("did:plc:abc", record_cid);
        let car = write_car(
            &[commit_cid],
            &[(commit_cid, commit_bytes), (record_cid, record_bytes)],
        );

        let err = parse_archive(&car[..car.len() - 3]).await.unwrap_err();
        assert_eq!(*err.kind(), RepoErrorKind::Corrupt);
    }

    #[tokio::test]
    async fn rejects_missing_root_block() {
        let (record_cid, record_bytes) = encode_block(&ipld_core::ipld::Ipld::String("v".into()));
        let (commit_cid, _) = commit_block("did:plc:abc", record_cid);
        let car = write_car(&[commit_cid], &[(record_cid, record_bytes)]);

        let err = parse_archive(&car).await.unwrap_err();
        assert_eq!(*err.kind(), RepoErrorKind::Corrupt);
    }

    #[test]
    fn compute_cid_round_trips_verify() {
        let data = b"hello world";
        let cid = compute_cid(data);
        verify_block(&cid, data).unwrap();
        assert!(verify_block(&cid, b"hello walrus").is_err());
    }
}
