//! Typed record decoding and post search
//!
//! Record values arrive as DAG-CBOR maps; the `$type` field names the
//! schema. Known collections decode into typed structs, anything else is
//! surfaced as a raw IPLD map. A value whose fields carry the wrong
//! primitive kind is skipped (and counted), never fatal.

use crate::error::{RepoError, Result};
use ipld_core::ipld::Ipld;
use smol_str::SmolStr;
use unicode_normalization::UnicodeNormalization;

/// Collection NSIDs this crate understands
pub mod collections {
    pub const POST: &str = "app.bsky.feed.post";
    pub const PROFILE: &str = "app.bsky.actor.profile";
    pub const LIKE: &str = "app.bsky.feed.like";
    pub const REPOST: &str = "app.bsky.feed.repost";
}

/// One decoded record out of an archive
#[derive(Debug, Clone)]
pub struct Record {
    pub collection: SmolStr,
    pub rkey: SmolStr,
    pub cid: cid::Cid,
    pub value: RecordValue,
}

impl Record {
    /// The record's `at://` URI
    pub fn at_uri(&self, did: &str) -> String {
        format!("at://{}/{}/{}", did, self.collection, self.rkey)
    }
}

/// Typed record value, falling back to raw IPLD for unknown schemas
#[derive(Debug, Clone)]
pub enum RecordValue {
    Post(PostRecord),
    Profile(ProfileRecord),
    Like(LikeRecord),
    Repost(RepostRecord),
    Unknown(Ipld),
}

/// `app.bsky.feed.post`
#[derive(Debug, Clone, Default)]
pub struct PostRecord {
    pub text: String,
    pub created_at: Option<String>,
    pub langs: Vec<String>,
    pub reply: Option<ReplyRef>,
    pub embed: Option<Embed>,
}

/// `app.bsky.actor.profile`
#[derive(Debug, Clone, Default)]
pub struct ProfileRecord {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<String>,
}

/// `app.bsky.feed.like`
#[derive(Debug, Clone)]
pub struct LikeRecord {
    pub subject: StrongRef,
    pub created_at: Option<String>,
}

/// `app.bsky.feed.repost`
#[derive(Debug, Clone)]
pub struct RepostRecord {
    pub subject: StrongRef,
    pub created_at: Option<String>,
}

/// `com.atproto.repo.strongRef`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Reply references on a post
#[derive(Debug, Clone)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// Post embed, reduced to its searchable text surfaces
#[derive(Debug, Clone)]
pub enum Embed {
    Images(Vec<ImageEmbed>),
    External(ExternalEmbed),
    RecordWithMedia(Box<Embed>),
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct ImageEmbed {
    pub alt: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExternalEmbed {
    pub uri: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// A value field held the wrong primitive kind; the record is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongKind {
    pub field: &'static str,
}

impl RecordValue {
    /// Decode a record value for a collection.
    ///
    /// `Err(WrongKind)` means a required field held the wrong primitive
    /// kind; the caller skips the record and counts it.
    pub fn decode(collection: &str, value: &Ipld) -> std::result::Result<Self, WrongKind> {
        match collection {
            collections::POST => Ok(RecordValue::Post(PostRecord::from_ipld(value)?)),
            collections::PROFILE => Ok(RecordValue::Profile(ProfileRecord::from_ipld(value)?)),
            collections::LIKE => Ok(RecordValue::Like(LikeRecord::from_ipld(value)?)),
            collections::REPOST => Ok(RecordValue::Repost(RepostRecord::from_ipld(value)?)),
            _ => Ok(RecordValue::Unknown(value.clone())),
        }
    }
}

impl PostRecord {
    fn from_ipld(value: &Ipld) -> std::result::Result<Self, WrongKind> {
        let map = as_map(value, "post")?;
        Ok(Self {
            text: required_str(map, "text")?,
            created_at: optional_str(map, "createdAt")?,
            langs: string_list(map, "langs")?,
            reply: match map.get("reply") {
                Some(v) => Some(ReplyRef::from_ipld(v)?),
                None => None,
            },
            embed: match map.get("embed") {
                Some(v) => Some(Embed::from_ipld(v)?),
                None => None,
            },
        })
    }

    /// All text surfaces that participate in search scoring
    pub fn search_surfaces(&self) -> Vec<&str> {
        let mut surfaces = vec![self.text.as_str()];
        if let Some(embed) = &self.embed {
            embed.collect_surfaces(&mut surfaces);
        }
        surfaces
    }
}

impl ProfileRecord {
    fn from_ipld(value: &Ipld) -> std::result::Result<Self, WrongKind> {
        let map = as_map(value, "profile")?;
        Ok(Self {
            display_name: optional_str(map, "displayName")?,
            description: optional_str(map, "description")?,
            created_at: optional_str(map, "createdAt")?,
        })
    }
}

impl LikeRecord {
    fn from_ipld(value: &Ipld) -> std::result::Result<Self, WrongKind> {
        let map = as_map(value, "like")?;
        Ok(Self {
            subject: StrongRef::from_field(map, "subject")?,
            created_at: optional_str(map, "createdAt")?,
        })
    }
}

impl RepostRecord {
    fn from_ipld(value: &Ipld) -> std::result::Result<Self, WrongKind> {
        let map = as_map(value, "repost")?;
        Ok(Self {
            subject: StrongRef::from_field(map, "subject")?,
            created_at: optional_str(map, "createdAt")?,
        })
    }
}

impl StrongRef {
    fn from_field(
        map: &std::collections::BTreeMap<String, Ipld>,
        field: &'static str,
    ) -> std::result::Result<Self, WrongKind> {
        let inner = as_map(map.get(field).ok_or(WrongKind { field })?, field)?;
        Ok(Self {
            uri: required_str(inner, "uri")?,
            cid: required_str(inner, "cid")?,
        })
    }
}

impl ReplyRef {
    fn from_ipld(value: &Ipld) -> std::result::Result<Self, WrongKind> {
        let map = as_map(value, "reply")?;
        Ok(Self {
            root: StrongRef::from_field(map, "root")?,
            parent: StrongRef::from_field(map, "parent")?,
        })
    }
}

impl Embed {
    fn from_ipld(value: &Ipld) -> std::result::Result<Self, WrongKind> {
        let map = as_map(value, "embed")?;
        let embed_type = optional_str(map, "$type")?.unwrap_or_default();
        match embed_type.as_str() {
            "app.bsky.embed.images" => {
                let mut images = Vec::new();
                if let Some(Ipld::List(list)) = map.get("images") {
                    for item in list {
                        let image = as_map(item, "image")?;
                        images.push(ImageEmbed {
                            alt: optional_str(image, "alt")?,
                        });
                    }
                }
                Ok(Embed::Images(images))
            }
            "app.bsky.embed.external" => {
                let external = as_map(
                    map.get("external").ok_or(WrongKind { field: "external" })?,
                    "external",
                )?;
                Ok(Embed::External(ExternalEmbed {
                    uri: optional_str(external, "uri")?,
                    title: optional_str(external, "title")?,
                    description: optional_str(external, "description")?,
                }))
            }
            "app.bsky.embed.recordWithMedia" => {
                let media = map.get("media").ok_or(WrongKind { field: "media" })?;
                Ok(Embed::RecordWithMedia(Box::new(Embed::from_ipld(media)?)))
            }
            _ => Ok(Embed::Other),
        }
    }

    fn collect_surfaces<'a>(&'a self, surfaces: &mut Vec<&'a str>) {
        match self {
            Embed::Images(images) => {
                surfaces.extend(images.iter().filter_map(|i| i.alt.as_deref()));
            }
            Embed::External(external) => {
                surfaces.extend(external.title.as_deref());
                surfaces.extend(external.description.as_deref());
            }
            Embed::RecordWithMedia(media) => media.collect_surfaces(surfaces),
            Embed::Other => {}
        }
    }
}

// IPLD field extraction helpers. Absent fields are tolerated where the
// schema allows; a present field of the wrong kind is a `WrongKind`.

fn as_map<'a>(
    value: &'a Ipld,
    field: &'static str,
) -> std::result::Result<&'a std::collections::BTreeMap<String, Ipld>, WrongKind> {
    match value {
        Ipld::Map(map) => Ok(map),
        _ => Err(WrongKind { field }),
    }
}

fn required_str(
    map: &std::collections::BTreeMap<String, Ipld>,
    field: &'static str,
) -> std::result::Result<String, WrongKind> {
    match map.get(field) {
        Some(Ipld::String(s)) => Ok(s.clone()),
        _ => Err(WrongKind { field }),
    }
}

fn optional_str(
    map: &std::collections::BTreeMap<String, Ipld>,
    field: &'static str,
) -> std::result::Result<Option<String>, WrongKind> {
    match map.get(field) {
        None | Some(Ipld::Null) => Ok(None),
        Some(Ipld::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(WrongKind { field }),
    }
}

fn string_list(
    map: &std::collections::BTreeMap<String, Ipld>,
    field: &'static str,
) -> std::result::Result<Vec<String>, WrongKind> {
    match map.get(field) {
        None | Some(Ipld::Null) => Ok(Vec::new()),
        Some(Ipld::List(list)) => list
            .iter()
            .map(|v| match v {
                Ipld::String(s) => Ok(s.clone()),
                _ => Err(WrongKind { field }),
            })
            .collect(),
        Some(_) => Err(WrongKind { field }),
    }
}

/// Normalize text for matching: Unicode NFKC, then lowercase
pub fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

/// A parsed search query: whitespace-split, normalized terms
#[derive(Debug, Clone)]
pub struct SearchQuery {
    terms: Vec<String>,
}

impl SearchQuery {
    /// Parse a query, rejecting empty or oversize input
    pub fn parse(query: &str, max_len: usize) -> Result<Self> {
        if query.len() > max_len {
            return Err(RepoError::invalid_input(format!(
                "query is {} bytes, maximum {}",
                query.len(),
                max_len
            )));
        }
        let terms: Vec<String> = normalize(query)
            .split_whitespace()
            .map(String::from)
            .collect();
        if terms.is_empty() {
            return Err(RepoError::invalid_input("empty query"));
        }
        Ok(Self { terms })
    }

    /// Substring hit count across the post's text, external embed
    /// title/description, and image alt fields.
    pub fn score_post(&self, post: &PostRecord) -> usize {
        let surfaces: Vec<String> = post
            .search_surfaces()
            .into_iter()
            .map(normalize)
            .collect();
        self.terms
            .iter()
            .map(|term| {
                surfaces
                    .iter()
                    .map(|surface| surface.matches(term.as_str()).count())
                    .sum::<usize>()
            })
            .sum()
    }
}
