//! Decoding of `Authorization: Nostr <base64>` tokens and their binding to
//! the request being served.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use crate::event::{sha256_hex, AuthEvent, Event, ShapeError};
use crate::verify;

/// Authorization scheme carrying a base64 encoded auth event.
pub const AUTH_SCHEME: &str = "Nostr";

/// Reasons a bearer token is refused. All of them surface as 401.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing authorization header")]
    Missing,
    #[error("malformed authorization token: {0}")]
    Malformed(String),
    #[error("invalid event signature")]
    BadSignature,
    #[error("invalid auth event: {0}")]
    Shape(#[from] ShapeError),
    #[error("token is bound to method {token}, request used {request}")]
    MethodMismatch { token: String, request: String },
    #[error("token is bound to url {token}, request went to {request}")]
    UrlBindingMismatch { token: String, request: String },
    #[error("payload tag does not match the request body")]
    PayloadMismatch,
    #[error("token created at {created_at} is outside the freshness window (now {now})")]
    Expired { created_at: u64, now: u64 },
}

/// What the token must be bound to.
#[derive(Debug, Clone, Copy)]
pub struct RequestBinding<'a> {
    /// HTTP method of the current request.
    pub method: &'a str,
    /// Full request URL: scheme, host, path and query.
    pub url: &'a str,
    /// Request body; empty when there is none.
    pub body: &'a [u8],
}

/// Decode the raw header value into a candidate event.
pub fn decode_header(value: Option<&str>) -> Result<Event, TokenError> {
    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let value = value.ok_or(TokenError::Missing)?;
    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| TokenError::Malformed("expected `Nostr <token>`".into()))?;
    if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) {
        return Err(TokenError::Malformed(format!("unsupported scheme {scheme}")));
    }
    let bytes = BASE64
        .decode(token.trim())
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
}

/// Decode, verify and bind a token to the current request.
///
/// `window` bounds `|now - created_at|` in seconds. A missing `payload` tag
/// is accepted; when present it must hash the body exactly.
pub fn authenticate(
    header: Option<&str>,
    binding: &RequestBinding<'_>,
    window: u64,
    now: u64,
) -> Result<AuthEvent, TokenError> {
    let event = decode_header(header)?;
    if !verify::verify(&event) {
        return Err(TokenError::BadSignature);
    }
    let auth = AuthEvent::try_from(event)?;
    if !auth.method.eq_ignore_ascii_case(binding.method) {
        return Err(TokenError::MethodMismatch {
            token: auth.method,
            request: binding.method.to_string(),
        });
    }
    if auth.url != binding.url {
        return Err(TokenError::UrlBindingMismatch {
            token: auth.url,
            request: binding.url.to_string(),
        });
    }
    if let Some(payload) = &auth.payload {
        if *payload != sha256_hex(binding.body) {
            return Err(TokenError::PayloadMismatch);
        }
    }
    let created_at = auth.event.created_at;
    if created_at.abs_diff(now) > window {
        return Err(TokenError::Expired { created_at, now });
    }
    Ok(auth)
}
