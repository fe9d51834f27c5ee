//! Merkle search tree traversal
//!
//! Read-only, in-order walk over the MST index of a parsed archive. Nodes
//! use the wire shape `{l, e: [{k, p, t, v}]}` with prefix-compressed keys;
//! the walker decompresses keys as it loads each node and yields
//! `(collection, rkey, value CID)` triples in collection-then-key order.

use crate::car::ParsedArchive;
use crate::error::{RepoError, Result};
use cid::Cid;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Wire format node data (DAG-CBOR)
///
/// Option fields serialize as explicit `null`; skipping them would change
/// the canonical bytes and therefore the node CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    /// Left-most subtree pointer
    #[serde(rename = "l")]
    pub left: Option<Cid>,

    /// Entries in this node (sorted by full key, prefix-compressed)
    #[serde(rename = "e")]
    pub entries: Vec<TreeEntry>,
}

/// Wire format entry (prefix-compressed leaf with optional subtree pointer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Key suffix after the shared prefix (CBOR byte string)
    #[serde(rename = "k", with = "serde_bytes")]
    pub key_suffix: Vec<u8>,

    /// Number of bytes shared with the previous key in this node
    #[serde(rename = "p")]
    pub prefix_len: u8,

    /// Subtree between this leaf and the next (CID of a child node)
    #[serde(rename = "t")]
    pub tree: Option<Cid>,

    /// CID of the record value
    #[serde(rename = "v")]
    pub value: Cid,
}

/// One record reference emitted by the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub collection: SmolStr,
    pub rkey: SmolStr,
    pub cid: Cid,
}

enum Item {
    Subtree(Cid),
    Leaf { key: String, value: Cid },
}

struct Frame {
    items: Vec<Item>,
    index: usize,
}

/// In-order MST walker over an in-memory archive.
///
/// Lazy and restartable: construct a fresh walker to start over. Each node
/// block is parsed exactly once per walk, when first descended into.
pub struct MstWalker<'a> {
    archive: &'a ParsedArchive,
    stack: Vec<Frame>,
    done: bool,
}

impl<'a> MstWalker<'a> {
    /// Start a walk at the commit's tree root
    pub fn new(archive: &'a ParsedArchive) -> Result<Self> {
        let root = archive.commit.data;
        let mut walker = Self {
            archive,
            stack: Vec::new(),
            done: false,
        };
        walker.descend(root)?;
        Ok(walker)
    }

    fn descend(&mut self, cid: Cid) -> Result<()> {
        let bytes = self.archive.block(&cid)?;
        let node: NodeData = serde_ipld_dagcbor::from_slice(bytes)
            .map_err(|e| RepoError::corrupt(format!("invalid MST node {cid}: {e}")))?;

        let mut items = Vec::with_capacity(node.entries.len() * 2 + 1);
        if let Some(left) = node.left {
            items.push(Item::Subtree(left));
        }
        let mut prev_key = String::new();
        for entry in node.entries {
            let prefix_len = entry.prefix_len as usize;
            if prefix_len > prev_key.len() {
                return Err(RepoError::corrupt(format!(
                    "MST entry prefix {} exceeds previous key length {}",
                    prefix_len,
                    prev_key.len()
                )));
            }
            let suffix = std::str::from_utf8(&entry.key_suffix)
                .map_err(|_| RepoError::corrupt("MST key is not UTF-8"))?;
            let key = format!("{}{}", &prev_key[..prefix_len], suffix);
            prev_key = key.clone();
            items.push(Item::Leaf {
                key,
                value: entry.value,
            });
            if let Some(tree) = entry.tree {
                items.push(Item::Subtree(tree));
            }
        }
        self.stack.push(Frame { items, index: 0 });
        Ok(())
    }

    fn next_ref(&mut self) -> Result<Option<RecordRef>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            if frame.index >= frame.items.len() {
                self.stack.pop();
                continue;
            }
            let item = &frame.items[frame.index];
            frame.index += 1;
            match item {
                Item::Subtree(cid) => {
                    let cid = *cid;
                    self.descend(cid)?;
                }
                Item::Leaf { key, value } => {
                    let (collection, rkey) = split_key(key)?;
                    return Ok(Some(RecordRef {
                        collection,
                        rkey,
                        cid: *value,
                    }));
                }
            }
        }
    }
}

impl Iterator for MstWalker<'_> {
    type Item = Result<RecordRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_ref() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn split_key(key: &str) -> Result<(SmolStr, SmolStr)> {
    match key.split_once('/') {
        Some((collection, rkey)) if !collection.is_empty() && !rkey.is_empty() => {
            Ok((SmolStr::new(collection), SmolStr::new(rkey)))
        }
        _ => Err(RepoError::corrupt(format!("malformed record key: {key}"))),
    }
}
