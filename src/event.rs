//! Nostr event model and the typed views the server works with.
//!
//! Raw [`Event`]s arrive from the wire (the `Authorization` header, stored
//! provenance sidecars) and are turned into an [`AuthEvent`] or a
//! [`FileMetadata`] exactly once. Everything past that boundary reads typed
//! fields instead of scanning tags.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// NIP-98 HTTP auth event.
pub const KIND_HTTP_AUTH: u32 = 27235;
/// NIP-94 file metadata event.
pub const KIND_FILE_METADATA: u32 = 1063;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag, the rest carry data. Tags used here:
///
/// - `u` / `method` / `payload` – request binding of an auth event
/// - `url` / `m` / `x` / `size` – file metadata
/// - `p` – uploader recorded on file metadata
/// - `delegation` – NIP-26 delegation `[from, conditions, sig]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from any list of string-like fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(fields.into_iter().map(Into::into).collect())
    }

    /// Tag name, e.g. `"u"`.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First data element following the name.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed Nostr event as it appears on the wire and in sidecars.
///
/// ```json
/// {
///   "id": "5c83...",
///   "pubkey": "79be...",
///   "kind": 27235,
///   "created_at": 1700000000,
///   "tags": [["u", "https://blobs.example/file/ab12..."], ["method", "PUT"]],
///   "content": "",
///   "sig": "e855..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (x-only, hex). Doubles as the signer identity.
    pub pubkey: String,
    /// Kind number, e.g. `27235` or `1063`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// First tag named `name`.
    pub fn find_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name() == Some(name))
    }

    /// Value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.find_tag(name).and_then(Tag::value)
    }
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> Result<[u8; 32], serde_json::Error> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    Ok(Sha256::digest(&data).into())
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// True for a 64 character hex string (either case).
pub fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Why a raw event could not be viewed as a typed event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("expected kind {expected}, found {found}")]
    WrongKind { expected: u32, found: u32 },
    #[error("missing `{0}` tag")]
    MissingTag(&'static str),
    #[error("invalid `{0}` tag")]
    InvalidTag(&'static str),
}

/// NIP-26 delegation tag: `["delegation", from, conditions, sig]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationTag {
    /// Delegator public key.
    pub from: String,
    /// Condition query string, e.g. `kind=1063&created_at<1700000000`.
    pub conditions: String,
    /// Delegator's Schnorr signature over the delegation token.
    pub sig: String,
}

impl DelegationTag {
    fn from_tag(tag: &Tag) -> Result<Self, ShapeError> {
        match tag.0.as_slice() {
            [_, from, conditions, sig, ..] if is_hex64(from) => Ok(Self {
                from: from.to_ascii_lowercase(),
                conditions: conditions.clone(),
                sig: sig.clone(),
            }),
            _ => Err(ShapeError::InvalidTag("delegation")),
        }
    }

    pub fn to_tag(&self) -> Tag {
        Tag::new([
            "delegation",
            self.from.as_str(),
            self.conditions.as_str(),
            self.sig.as_str(),
        ])
    }
}

fn delegation_of(ev: &Event) -> Result<Option<DelegationTag>, ShapeError> {
    ev.find_tag("delegation")
        .map(DelegationTag::from_tag)
        .transpose()
}

fn expect_kind(ev: &Event, expected: u32) -> Result<(), ShapeError> {
    if ev.kind != expected {
        return Err(ShapeError::WrongKind {
            expected,
            found: ev.kind,
        });
    }
    Ok(())
}

/// HTTP auth event bound to a single request.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub event: Event,
    /// `method` tag value as sent.
    pub method: String,
    /// `u` tag value as sent.
    pub url: String,
    /// Optional `payload` tag (hex SHA-256 of the request body).
    pub payload: Option<String>,
    pub delegation: Option<DelegationTag>,
}

impl AuthEvent {
    /// Identity that signed the token.
    pub fn signer(&self) -> &str {
        &self.event.pubkey
    }
}

impl TryFrom<Event> for AuthEvent {
    type Error = ShapeError;

    fn try_from(event: Event) -> Result<Self, Self::Error> {
        expect_kind(&event, KIND_HTTP_AUTH)?;
        let url = event
            .tag_value("u")
            .ok_or(ShapeError::MissingTag("u"))?
            .to_string();
        let method = event
            .tag_value("method")
            .ok_or(ShapeError::MissingTag("method"))?
            .to_string();
        let payload = match event.find_tag("payload") {
            Some(tag) => match tag.value() {
                Some(v) if is_hex64(v) => Some(v.to_ascii_lowercase()),
                _ => return Err(ShapeError::InvalidTag("payload")),
            },
            None => None,
        };
        let delegation = delegation_of(&event)?;
        Ok(Self {
            event,
            method,
            url,
            payload,
            delegation,
        })
    }
}

/// File metadata (provenance) event describing one stored object.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub event: Event,
    pub url: String,
    /// `m` tag: media type.
    pub media_type: String,
    /// `x` tag: lowercase hex SHA-256 of the object.
    pub sha256: String,
    pub size: u64,
    /// `p` tag: identity whose upload produced this object.
    pub uploader: Option<String>,
    pub delegation: Option<DelegationTag>,
}

impl FileMetadata {
    /// Identity that published the object: the recorded uploader, falling
    /// back to the event signer when no `p` tag is present.
    pub fn publisher(&self) -> &str {
        self.uploader.as_deref().unwrap_or(&self.event.pubkey)
    }
}

impl TryFrom<Event> for FileMetadata {
    type Error = ShapeError;

    fn try_from(event: Event) -> Result<Self, Self::Error> {
        expect_kind(&event, KIND_FILE_METADATA)?;
        let url = event
            .tag_value("url")
            .ok_or(ShapeError::MissingTag("url"))?
            .to_string();
        let media_type = event
            .tag_value("m")
            .filter(|m| !m.is_empty())
            .ok_or(ShapeError::MissingTag("m"))?
            .to_string();
        let sha256 = match event.tag_value("x") {
            Some(x) if is_hex64(x) => x.to_ascii_lowercase(),
            Some(_) => return Err(ShapeError::InvalidTag("x")),
            None => return Err(ShapeError::MissingTag("x")),
        };
        let size = event
            .tag_value("size")
            .ok_or(ShapeError::MissingTag("size"))?
            .parse()
            .map_err(|_| ShapeError::InvalidTag("size"))?;
        let uploader = match event.tag_value("p") {
            Some(p) if is_hex64(p) => Some(p.to_ascii_lowercase()),
            Some(_) => return Err(ShapeError::InvalidTag("p")),
            None => None,
        };
        let delegation = delegation_of(&event)?;
        Ok(Self {
            event,
            url,
            media_type,
            sha256,
            size,
            uploader,
            delegation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: u32, tags: Vec<Tag>) -> Event {
        Event {
            id: String::new(),
            pubkey: "ab".repeat(32),
            kind,
            created_at: 1,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn event_hash_matches_known_id() {
        // sha256 of [0,"abab…ab",1700000000,1,[["t","blob"]],"hello"]
        let mut ev = raw(1, vec![Tag::new(["t", "blob"])]);
        ev.created_at = 1_700_000_000;
        ev.content = "hello".into();
        assert_eq!(
            hex::encode(event_hash(&ev).unwrap()),
            "0e39caeb2e467811e131bb5e7c80754654f8a4b3e952b24326cf337188bf04ec"
        );
    }

    #[test]
    fn hash_changes_with_tags() {
        let a = raw(1, vec![]);
        let b = raw(1, vec![Tag::new(["t", "x"])]);
        assert_ne!(event_hash(&a).unwrap(), event_hash(&b).unwrap());
    }

    #[test]
    fn tags_serialize_as_plain_arrays() {
        let tag = Tag::new(["u", "https://a/b"]);
        assert_eq!(serde_json::to_string(&tag).unwrap(), r#"["u","https://a/b"]"#);
    }

    #[test]
    fn auth_event_requires_url_and_method() {
        let ev = raw(KIND_HTTP_AUTH, vec![Tag::new(["method", "PUT"])]);
        assert_eq!(
            AuthEvent::try_from(ev).unwrap_err(),
            ShapeError::MissingTag("u")
        );
        let ev = raw(KIND_HTTP_AUTH, vec![Tag::new(["u", "http://h/"])]);
        assert_eq!(
            AuthEvent::try_from(ev).unwrap_err(),
            ShapeError::MissingTag("method")
        );
    }

    #[test]
    fn auth_event_rejects_other_kinds() {
        let ev = raw(1, vec![Tag::new(["u", "x"]), Tag::new(["method", "GET"])]);
        assert_eq!(
            AuthEvent::try_from(ev).unwrap_err(),
            ShapeError::WrongKind {
                expected: KIND_HTTP_AUTH,
                found: 1
            }
        );
    }

    #[test]
    fn auth_event_parses_payload_and_delegation() {
        let from = "cd".repeat(32);
        let ev = raw(
            KIND_HTTP_AUTH,
            vec![
                Tag::new(["u", "http://h/file/1"]),
                Tag::new(["method", "put"]),
                Tag::new(["payload", "AB".repeat(32).as_str()]),
                Tag::new(["delegation", from.as_str(), "kind=1063", "00"]),
            ],
        );
        let auth = AuthEvent::try_from(ev).unwrap();
        assert_eq!(auth.method, "put");
        assert_eq!(auth.payload.as_deref(), Some("ab".repeat(32).as_str()));
        let delegation = auth.delegation.unwrap();
        assert_eq!(delegation.from, from);
        assert_eq!(delegation.conditions, "kind=1063");
    }

    #[test]
    fn auth_event_rejects_malformed_payload() {
        let ev = raw(
            KIND_HTTP_AUTH,
            vec![
                Tag::new(["u", "x"]),
                Tag::new(["method", "PUT"]),
                Tag::new(["payload", "nothex"]),
            ],
        );
        assert_eq!(
            AuthEvent::try_from(ev).unwrap_err(),
            ShapeError::InvalidTag("payload")
        );
    }

    #[test]
    fn file_metadata_parses_and_reports_publisher() {
        let uploader = "ef".repeat(32);
        let ev = raw(
            KIND_FILE_METADATA,
            vec![
                Tag::new(["url", "http://h/file/aa"]),
                Tag::new(["m", "text/plain"]),
                Tag::new(["x", "aa".repeat(32).as_str()]),
                Tag::new(["size", "5"]),
                Tag::new(["p", uploader.as_str()]),
            ],
        );
        let meta = FileMetadata::try_from(ev).unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.publisher(), uploader);
        assert!(meta.delegation.is_none());
    }

    #[test]
    fn file_metadata_without_uploader_falls_back_to_signer() {
        let ev = raw(
            KIND_FILE_METADATA,
            vec![
                Tag::new(["url", "u"]),
                Tag::new(["m", "image/png"]),
                Tag::new(["x", "aa".repeat(32).as_str()]),
                Tag::new(["size", "1"]),
            ],
        );
        let meta = FileMetadata::try_from(ev).unwrap();
        assert_eq!(meta.publisher(), "ab".repeat(32));
    }

    #[test]
    fn file_metadata_rejects_bad_size() {
        let ev = raw(
            KIND_FILE_METADATA,
            vec![
                Tag::new(["url", "u"]),
                Tag::new(["m", "image/png"]),
                Tag::new(["x", "aa".repeat(32).as_str()]),
                Tag::new(["size", "-1"]),
            ],
        );
        assert_eq!(
            FileMetadata::try_from(ev).unwrap_err(),
            ShapeError::InvalidTag("size")
        );
    }

    #[test]
    fn hex64_check() {
        assert!(is_hex64(&"aB".repeat(32)));
        assert!(!is_hex64("not-a-hash"));
        assert!(!is_hex64(&"g".repeat(64)));
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
