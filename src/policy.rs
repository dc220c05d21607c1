//! Write and delete gates.
//!
//! Each gate is a pure decision over already-resolved facts and returns
//! [`Decision::Allow`] with what matched, or [`Decision::Deny`] with why.

use thiserror::Error;

use crate::delegation;
use crate::event::FileMetadata;
use crate::roles::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    Allow(T),
    Deny(DenyReason),
}

/// Why a gate refused. Every reason surfaces as 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("no role assigned to this key")]
    NoRole,
    #[error("this key is banned")]
    Banned,
    #[error("only the publisher, its delegator or an admin may delete this object")]
    NotOwner,
}

/// What allowed a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteGrant {
    Admin,
    Publisher,
    Delegator,
}

/// Uploads need an `admin` or `user` role.
pub fn write_gate(role: Option<Role>) -> Decision<Role> {
    match role {
        Some(role @ (Role::Admin | Role::User)) => Decision::Allow(role),
        Some(Role::Banned) => Decision::Deny(DenyReason::Banned),
        None => Decision::Deny(DenyReason::NoRole),
    }
}

/// Deletes are allowed to admins, the recorded publisher, or the publisher's
/// resolved delegator. Without stored metadata only admins may delete.
///
/// Ownership needs no role: a publisher or delegator with no role entry may
/// still delete, since removing a role only stops new uploads. Only an
/// explicit `banned` role takes ownership away.
pub fn delete_gate(
    caller: &str,
    role: Option<Role>,
    metadata: Option<&FileMetadata>,
) -> Decision<DeleteGrant> {
    match role {
        Some(Role::Banned) => return Decision::Deny(DenyReason::Banned),
        Some(Role::Admin) => return Decision::Allow(DeleteGrant::Admin),
        _ => {}
    }
    let Some(meta) = metadata else {
        return Decision::Deny(DenyReason::NotOwner);
    };
    if meta.publisher().eq_ignore_ascii_case(caller) {
        return Decision::Allow(DeleteGrant::Publisher);
    }
    match delegation::resolve_for(meta) {
        Some(delegator) if delegator.eq_ignore_ascii_case(caller) => {
            Decision::Allow(DeleteGrant::Delegator)
        }
        _ => Decision::Deny(DenyReason::NotOwner),
    }
}
