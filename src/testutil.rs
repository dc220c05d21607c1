//! Helpers shared by unit tests: deterministic keys and signed tokens.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::delegation::delegation_digest;
use crate::event::{sha256_hex, DelegationTag, Event, Tag, KIND_HTTP_AUTH};
use crate::keys::{Keys, UnsignedEvent};

/// Deterministic keys from a repeated secret byte.
pub fn keys(byte: u8) -> Keys {
    Keys::from_secret_slice(&[byte; 32]).unwrap()
}

/// Signed HTTP auth event for `method url`, optionally binding `body`.
pub fn auth_event(
    keys: &Keys,
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    created_at: u64,
) -> Event {
    auth_event_with(keys, method, url, body, created_at, vec![])
}

pub fn auth_event_with(
    keys: &Keys,
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    created_at: u64,
    extra: Vec<Tag>,
) -> Event {
    let mut tags = vec![Tag::new(["u", url]), Tag::new(["method", method])];
    if let Some(body) = body {
        tags.push(Tag::new(["payload".to_string(), sha256_hex(body)]));
    }
    tags.extend(extra);
    keys.sign(UnsignedEvent {
        kind: KIND_HTTP_AUTH,
        created_at,
        tags,
        content: String::new(),
    })
    .unwrap()
}

/// `Authorization` header value carrying `ev`.
pub fn auth_header(ev: &Event) -> String {
    format!("Nostr {}", BASE64.encode(serde_json::to_vec(ev).unwrap()))
}

/// Delegation from `delegator` to `delegatee` under `conditions`.
pub fn delegation(delegator: &Keys, delegatee: &str, conditions: &str) -> DelegationTag {
    DelegationTag {
        from: delegator.public_key().to_string(),
        conditions: conditions.to_string(),
        sig: delegator.sign_digest(&delegation_digest(delegatee, conditions)),
    }
}
