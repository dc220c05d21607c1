//! NIP-26 delegation: who ultimately authorized an event.
//!
//! A delegation token is `sha256("nostr:delegation:<delegatee>:<conditions>")`
//! signed by the delegator. Conditions are `&`-joined clauses:
//!
//! - `kind=<n>` – allowed kinds; several clauses are alternatives
//! - `created_at<<t>` / `created_at><t>` – strict time bounds, all must hold
//!
//! Resolution never fails loudly. An invalid delegation is logged and
//! treated as absent; falling back to the publisher is the caller's call.

use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::event::{DelegationTag, FileMetadata};
use crate::verify;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelegationError {
    #[error("invalid delegation condition `{0}`")]
    InvalidCondition(String),
    #[error("delegation signature does not verify")]
    BadSignature,
    #[error("kind {0} is not delegated")]
    KindNotAllowed(u32),
    #[error("created_at {0} is outside the delegated window")]
    OutsideWindow(u64),
}

/// Parsed delegation conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    kinds: Vec<u32>,
    created_after: Option<u64>,
    created_before: Option<u64>,
}

impl FromStr for Conditions {
    type Err = DelegationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut conditions = Conditions::default();
        for clause in s.split('&').filter(|c| !c.is_empty()) {
            let invalid = || DelegationError::InvalidCondition(clause.to_string());
            if let Some(kind) = clause.strip_prefix("kind=") {
                conditions.kinds.push(kind.parse().map_err(|_| invalid())?);
            } else if let Some(t) = clause.strip_prefix("created_at<") {
                let t: u64 = t.parse().map_err(|_| invalid())?;
                let before = conditions.created_before.map_or(t, |b| b.min(t));
                conditions.created_before = Some(before);
            } else if let Some(t) = clause.strip_prefix("created_at>") {
                let t: u64 = t.parse().map_err(|_| invalid())?;
                let after = conditions.created_after.map_or(t, |a| a.max(t));
                conditions.created_after = Some(after);
            } else {
                return Err(invalid());
            }
        }
        Ok(conditions)
    }
}

impl Conditions {
    /// Check an event's kind and timestamp against the conditions.
    pub fn check(&self, kind: u32, created_at: u64) -> Result<(), DelegationError> {
        if !self.kinds.is_empty() && !self.kinds.contains(&kind) {
            return Err(DelegationError::KindNotAllowed(kind));
        }
        if self.created_after.is_some_and(|a| created_at <= a)
            || self.created_before.is_some_and(|b| created_at >= b)
        {
            return Err(DelegationError::OutsideWindow(created_at));
        }
        Ok(())
    }
}

/// Digest the delegator signs to authorize `delegatee` under `conditions`.
pub fn delegation_digest(delegatee: &str, conditions: &str) -> [u8; 32] {
    let token = format!("nostr:delegation:{delegatee}:{conditions}");
    Sha256::digest(token.as_bytes()).into()
}

/// Validate a delegation of `delegatee` for an event of `kind` at `created_at`.
pub fn check(
    tag: &DelegationTag,
    delegatee: &str,
    kind: u32,
    created_at: u64,
) -> Result<(), DelegationError> {
    let conditions: Conditions = tag.conditions.parse()?;
    let digest = delegation_digest(delegatee, &tag.conditions);
    if !verify::verify_digest(&tag.from, &digest, &tag.sig) {
        return Err(DelegationError::BadSignature);
    }
    conditions.check(kind, created_at)
}

/// Resolve the delegator behind `delegatee`, or `None` when there is no
/// valid delegation.
pub fn resolve(
    tag: Option<&DelegationTag>,
    delegatee: &str,
    kind: u32,
    created_at: u64,
) -> Option<String> {
    let tag = tag?;
    match check(tag, delegatee, kind, created_at) {
        Ok(()) => Some(tag.from.clone()),
        Err(e) => {
            warn!(delegator = %tag.from, %delegatee, "ignoring delegation: {e}");
            None
        }
    }
}

/// Delegator of a stored object's publisher, if any.
pub fn resolve_for(meta: &FileMetadata) -> Option<String> {
    resolve(
        meta.delegation.as_ref(),
        meta.publisher(),
        meta.event.kind,
        meta.event.created_at,
    )
}
