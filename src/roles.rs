//! Role assignments keyed by signer identity.

use std::{fmt, io, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::error;

use crate::event::is_hex64;

/// Role held by a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
    Banned,
}

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "banned" => Ok(Role::Banned),
            other => Err(RoleError::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Banned => "banned",
        })
    }
}

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("invalid public key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Key-value store of role assignments.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Role of `pubkey`, `None` when unassigned.
    async fn get(&self, pubkey: &str) -> Result<Option<Role>, RoleError>;

    async fn set(&self, pubkey: &str, role: Role) -> Result<(), RoleError>;

    /// Remove an assignment. Returns whether one existed.
    async fn remove(&self, pubkey: &str) -> Result<bool, RoleError>;

    /// All assignments, sorted by public key.
    async fn list(&self) -> Result<Vec<(String, Role)>, RoleError>;
}

/// Resolve the role of `pubkey`. Store failures are logged and resolve to
/// "no role", which every gate treats as unauthorized.
pub async fn resolve_role(store: &dyn RoleStore, pubkey: &str) -> Option<Role> {
    match store.get(pubkey).await {
        Ok(role) => role,
        Err(e) => {
            error!(%pubkey, "role lookup failed: {e}");
            None
        }
    }
}

fn normalize(pubkey: &str) -> Result<String, RoleError> {
    if !is_hex64(pubkey) {
        return Err(RoleError::InvalidKey(pubkey.to_string()));
    }
    Ok(pubkey.to_ascii_lowercase())
}

/// One file per public key under `<root>/roles`, holding the role name.
#[derive(Clone)]
pub struct FileRoleStore {
    root: PathBuf,
}

impl FileRoleStore {
    pub fn new(store_root: PathBuf) -> Self {
        Self {
            root: store_root.join("roles"),
        }
    }

    fn path(&self, pubkey: &str) -> Result<PathBuf, RoleError> {
        Ok(self.root.join(normalize(pubkey)?))
    }
}

#[async_trait]
impl RoleStore for FileRoleStore {
    async fn get(&self, pubkey: &str) -> Result<Option<Role>, RoleError> {
        let path = match self.path(pubkey) {
            Ok(path) => path,
            // Malformed identities simply hold no role.
            Err(RoleError::InvalidKey(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        match fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(data.parse()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, pubkey: &str, role: Role) -> Result<(), RoleError> {
        let path = self.path(pubkey)?;
        fs::create_dir_all(&self.root).await?;
        fs::write(path, format!("{role}\n")).await?;
        Ok(())
    }

    async fn remove(&self, pubkey: &str) -> Result<bool, RoleError> {
        match fs::remove_file(self.path(pubkey)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<(String, Role)>, RoleError> {
        let mut out = vec![];
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_hex64(&name) {
                continue;
            }
            if let Some(role) = self.get(&name).await? {
                out.push((name, role));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
pub use memory::MemoryRoleStore;
