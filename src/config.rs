//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};

/// Default `AUTH_WINDOW_SECS`: how far `created_at` may drift from now.
pub const DEFAULT_AUTH_WINDOW_SECS: u64 = 60;
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for objects and role assignments.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Externally visible base URL, e.g. `https://blobs.example`. Auth
    /// tokens are bound to URLs under it. Derived from `Host` when unset.
    pub public_url: Option<String>,
    /// Hex secret key used to sign provenance events.
    pub service_key: Option<String>,
    /// Accepted clock drift for auth tokens, in seconds.
    pub auth_window_secs: u64,
    /// `Cache-Control` recorded on uploaded objects.
    pub cache_control: String,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    /// Public keys granted `admin` when the server starts.
    pub admin_pubkeys: Vec<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP")?;
        let public_url = non_empty(env::var("PUBLIC_URL").ok())
            .map(|u| u.trim_end_matches('/').to_string());
        let service_key = non_empty(env::var("SERVICE_KEY").ok());
        let auth_window_secs = match non_empty(env::var("AUTH_WINDOW_SECS").ok()) {
            Some(v) => v.parse().context("AUTH_WINDOW_SECS")?,
            None => DEFAULT_AUTH_WINDOW_SECS,
        };
        let cache_control = non_empty(env::var("CACHE_CONTROL").ok())
            .unwrap_or_else(|| DEFAULT_CACHE_CONTROL.into());
        let max_upload_bytes = match non_empty(env::var("MAX_UPLOAD_BYTES").ok()) {
            Some(v) => v.parse().context("MAX_UPLOAD_BYTES")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };
        let admin_pubkeys = csv_strings(env::var("ADMIN_PUBKEYS").unwrap_or_default());
        Ok(Self {
            store_root,
            bind_http,
            public_url,
            service_key,
            auth_window_secs,
            cache_control,
            max_upload_bytes,
            admin_pubkeys,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
