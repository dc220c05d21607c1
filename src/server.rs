//! HTTP endpoints: health, server info, and the `/file/:hash` object routes.
//!
//! Handlers stay thin. Each one validates the path, authenticates the token
//! against the request it arrived on, resolves the caller's role and asks
//! the policy gates before touching the blob store.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tracing::{debug, info};

use crate::blobs::{metadata_key, BlobStore, ObjectDescriptor, PutOptions};
use crate::error::{ApiError, ApiResult};
use crate::event::{is_hex64, unix_now, AuthEvent};
use crate::policy::{delete_gate, write_gate, Decision};
use crate::provenance::{self, ProvenanceJob, ProvenanceWriter};
use crate::roles::{resolve_role, RoleStore};
use crate::token::{authenticate, RequestBinding};

const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";
const X_SHA256: HeaderName = HeaderName::from_static("x-sha256");

/// Everything a request handler needs. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub blobs: Arc<dyn BlobStore>,
    pub roles: Arc<dyn RoleStore>,
    pub provenance: ProvenanceWriter,
    /// Accepted `created_at` drift for auth tokens, in seconds.
    pub auth_window: u64,
    /// Base URL tokens are bound to. Falls back to `http://<Host>`.
    pub public_url: Option<String>,
    pub cache_control: String,
    pub max_upload_bytes: usize,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Service information served at `/`.
#[derive(Serialize, Deserialize)]
struct ServerInfo {
    name: String,
    software: String,
    version: String,
    /// Key that signs provenance events.
    pubkey: String,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(server_info))
        .route("/healthz", get(healthz))
        .route(
            "/file/:hash",
            get(get_file)
                .head(head_file)
                .put(put_file)
                .delete(delete_file),
        )
        .layer(DefaultBodyLimit::max(limit))
        .with_state(Arc::new(state))
}

/// Serve the router on `addr` until `shutdown` resolves, then wait for
/// pending provenance jobs.
pub async fn serve_http(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let provenance = state.provenance.clone();
    let app = router(state);
    info!(%addr, "listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    debug!("waiting for pending provenance jobs");
    provenance.drain().await;
    Ok(())
}

async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

async fn server_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(ServerInfo {
            name: "blobr".into(),
            software: "blobr".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            pubkey: state.provenance.public_key().to_string(),
        }),
    )
}

/// Lowercased object key for a path segment, `None` unless it is 64 hex chars.
fn parse_hash(raw: &str) -> Option<String> {
    is_hex64(raw).then(|| raw.to_ascii_lowercase())
}

fn not_found(hash: &str) -> ApiError {
    ApiError::NotFound(format!("no object {hash}"))
}

/// Scheme and authority requests are served under, without a trailing slash.
fn base_url(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    if let Some(base) = &state.public_url {
        return Ok(base.clone());
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing Host header".into()))?;
    Ok(format!("http://{host}"))
}

/// Authenticate the `Authorization` header against this exact request.
fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    url: &str,
    body: &[u8],
) -> ApiResult<AuthEvent> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let binding = RequestBinding { method, url, body };
    authenticate(header, &binding, state.auth_window, unix_now()).map_err(|e| {
        debug!(%method, %url, "authentication failed: {e}");
        ApiError::from(e)
    })
}

fn object_headers(desc: &ObjectDescriptor, default_cache_control: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let cache_control = desc
        .cache_control
        .as_deref()
        .unwrap_or(default_cache_control);
    let pairs = [
        (header::CONTENT_TYPE, desc.media_type.clone()),
        (header::CONTENT_LENGTH, desc.size.to_string()),
        (header::CACHE_CONTROL, cache_control.to_string()),
        (header::ETAG, format!("\"{}\"", desc.etag)),
        (X_SHA256, desc.sha256.clone()),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers
}

async fn head_file(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> ApiResult<Response> {
    let hash = parse_hash(&raw).ok_or_else(|| not_found(&raw))?;
    let desc = state
        .blobs
        .head(&hash)
        .await?
        .ok_or_else(|| not_found(&hash))?;
    Ok((StatusCode::OK, object_headers(&desc, &state.cache_control)).into_response())
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> ApiResult<Response> {
    let hash = parse_hash(&raw).ok_or_else(|| not_found(&raw))?;
    let obj = state
        .blobs
        .get(&hash)
        .await?
        .ok_or_else(|| not_found(&hash))?;
    let headers = object_headers(&obj.descriptor, &state.cache_control);
    Ok((StatusCode::OK, headers, obj.body).into_response())
}

/// Store a new object. The body must hash to the path.
///
/// The existence check and the write are two separate store calls. Two
/// racing uploads of the same content can both pass the check; the store's
/// create-if-absent `put` then lets exactly one of them win and the other
/// gets 409.
async fn put_file(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let hash = parse_hash(&raw)
        .ok_or_else(|| ApiError::Validation(format!("invalid hash {raw}")))?;
    let base = base_url(&state, &headers)?;
    let url = request_url(&base, &uri);
    let auth = authenticate_request(&state, &headers, "PUT", &url, &body)?;
    let signer = auth.signer().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("missing request body".into()));
    }
    if state.blobs.head(&hash).await?.is_some() {
        return Err(ApiError::Conflict(format!("{hash} already exists")));
    }
    let role = resolve_role(state.roles.as_ref(), &signer).await;
    if let Decision::Deny(reason) = write_gate(role) {
        debug!(%hash, %signer, "upload denied: {reason}");
        return Err(reason.into());
    }
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_string();
    // a sidecar left by an earlier copy of this object must not describe the new one
    if state.blobs.delete(&metadata_key(&hash)).await? {
        debug!(%hash, "cleared stale provenance sidecar");
    }
    let descriptor = state
        .blobs
        .put(
            &hash,
            body.to_vec(),
            PutOptions {
                expected_sha256: Some(hash.clone()),
                media_type,
                cache_control: Some(state.cache_control.clone()),
            },
        )
        .await?;
    info!(%hash, uploader = %signer, size = descriptor.size, "stored object");
    drop(state.provenance.spawn(ProvenanceJob {
        descriptor,
        url: format!("{base}/file/{hash}"),
        uploader: signer,
        delegation: auth.delegation,
    }));
    Ok(StatusCode::NO_CONTENT)
}

/// Remove an object and its provenance sidecar.
///
/// The sidecar goes first. If the object delete then fails, the object is
/// left without provenance and only an admin can remove it.
async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let hash = parse_hash(&raw)
        .ok_or_else(|| ApiError::Validation(format!("invalid hash {raw}")))?;
    let url = request_url(&base_url(&state, &headers)?, &uri);
    let auth = authenticate_request(&state, &headers, "DELETE", &url, &[])?;
    let caller = auth.signer();
    let role = resolve_role(state.roles.as_ref(), caller).await;
    if state.blobs.head(&hash).await?.is_none() {
        return Err(not_found(&hash));
    }
    let metadata = provenance::load(state.blobs.as_ref(), &hash).await?;
    let grant = match delete_gate(caller, role, metadata.as_ref()) {
        Decision::Allow(grant) => grant,
        Decision::Deny(reason) => {
            debug!(%hash, %caller, "delete denied: {reason}");
            return Err(reason.into());
        }
    };
    state.blobs.delete(&metadata_key(&hash)).await?;
    state.blobs.delete(&hash).await?;
    info!(%hash, %caller, ?grant, "deleted object");
    Ok(StatusCode::NO_CONTENT)
}

fn request_url(base: &str, uri: &Uri) -> String {
    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{base}{path}")
}
