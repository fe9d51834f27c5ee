//! In-memory repository index
//!
//! Built by draining the MST walk once: every record value is decoded a
//! single time and indexed by collection. Downstream consumers iterate the
//! index; they never touch blocks again.

use crate::car::ParsedArchive;
use crate::error::{RepoError, Result};
use crate::mst::MstWalker;
use crate::records::{Record, RecordValue};
use autoreply_identity::types::Did;
use ipld_core::ipld::Ipld;
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// A decoded repository: typed records in collection-then-rkey order
#[derive(Debug)]
pub struct Repo {
    did: Did,
    rev: String,
    records: Vec<Record>,
    by_collection: BTreeMap<SmolStr, Vec<usize>>,
    skipped: usize,
}

impl Repo {
    /// Decode a parsed archive into an indexed repository.
    ///
    /// Runs synchronously; callers keep it off the transport reader by
    /// invoking it from a worker task.
    pub fn decode(archive: &ParsedArchive) -> Result<Self> {
        let did = Did::new(&archive.commit.did)
            .map_err(|_| RepoError::corrupt(format!("commit DID invalid: {}", archive.commit.did)))?;

        let mut records = Vec::new();
        let mut by_collection: BTreeMap<SmolStr, Vec<usize>> = BTreeMap::new();
        let mut skipped = 0usize;

        for entry in MstWalker::new(archive)? {
            let entry = entry?;
            let bytes = archive.block(&entry.cid)?;
            let value: Ipld = serde_ipld_dagcbor::from_slice(bytes)
                .map_err(|e| RepoError::corrupt(format!("record {} is not DAG-CBOR: {e}", entry.cid)))?;
            match RecordValue::decode(&entry.collection, &value) {
                Ok(value) => {
                    let index = records.len();
                    by_collection
                        .entry(entry.collection.clone())
                        .or_default()
                        .push(index);
                    records.push(Record {
                        collection: entry.collection,
                        rkey: entry.rkey,
                        cid: entry.cid,
                        value,
                    });
                }
                Err(wrong_kind) => {
                    skipped += 1;
                    tracing::debug!(
                        collection = %entry.collection,
                        rkey = %entry.rkey,
                        field = wrong_kind.field,
                        "skipping record with wrong primitive kind"
                    );
                }
            }
        }

        Ok(Self {
            did,
            rev: archive.commit.rev.clone(),
            records,
            by_collection,
            skipped,
        })
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Commit revision this index was built from
    pub fn rev(&self) -> &str {
        &self.rev
    }

    /// All records, in collection order then key order
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Records of a single collection, in key order
    pub fn records_of<'a>(&'a self, collection: &str) -> impl Iterator<Item = &'a Record> {
        self.by_collection
            .get(collection)
            .into_iter()
            .flatten()
            .map(|&i| &self.records[i])
    }

    /// Number of records dropped for wrong primitive kinds
    pub fn skipped_records(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
