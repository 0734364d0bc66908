use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, LOCATION};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use gauntlet_store::StoredObject;
use gauntlet_types::{ContentHash, GitRedirect, ObjectKind};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};
use crate::router::AppState;

/// `X-Gauntlet-Type`, lowercased as `http` requires for static names.
pub const GAUNTLET_TYPE: HeaderName = HeaderName::from_static("x-gauntlet-type");

const READ_CHUNK: usize = 64 * 1024;

/// Hashes in the path must be exactly 40 hex digits; anything else is
/// treated as an object that does not exist.
fn parse_hash(raw: &str) -> ServerResult<ContentHash> {
    ContentHash::from_hex(raw).map_err(|_| ServerError::NotFound(raw.to_string()))
}

fn redirect_response(redirect: &GitRedirect) -> ServerResult<Response> {
    let location = HeaderValue::from_str(&redirect.url)
        .map_err(|_| ServerError::Internal(format!("unusable redirect URL for {}", redirect.hash)))?;
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, location);
    headers.insert(GAUNTLET_TYPE, HeaderValue::from_static(ObjectKind::Git.as_str()));
    Ok((StatusCode::MOVED_PERMANENTLY, headers).into_response())
}

fn raw_headers(size: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(GAUNTLET_TYPE, HeaderValue::from_static(ObjectKind::Raw.as_str()));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    headers
}

fn file_stream(file: tokio::fs::File) -> impl Stream<Item = std::io::Result<Bytes>> {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    })
}

/// `GET /:hash`
pub async fn get_object(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ServerResult<Response> {
    let hash = parse_hash(&raw)?;
    match state.store.lookup(&hash).await? {
        StoredObject::Git(redirect) => redirect_response(&redirect),
        StoredObject::Raw { .. } => {
            let (file, size) = state.store.open_object(&hash).await?;
            Ok((raw_headers(size), Body::from_stream(file_stream(file))).into_response())
        }
    }
}

/// `HEAD /:hash`
pub async fn head_object(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ServerResult<Response> {
    let hash = parse_hash(&raw)?;
    match state.store.lookup(&hash).await? {
        StoredObject::Git(redirect) => redirect_response(&redirect),
        StoredObject::Raw { size, .. } => Ok(raw_headers(size).into_response()),
    }
}

/// `POST /`: spool the body, hashing as it arrives, and answer with the hash.
pub async fn publish(State(state): State<AppState>, body: Body) -> ServerResult<String> {
    let mut staged = state.store.stage()?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ServerError::BadRequest(format!("upload interrupted: {e}")))?;
        staged.write(&chunk).await?;
    }
    let size = staged.size();
    let hash = staged.commit().await?;
    info!(%hash, size, "object stored");
    Ok(hash.to_hex())
}

/// `POST /git`: clone the repository named in the body and redirect its
/// commits to it. Answers with the slot id.
pub async fn register_git(State(state): State<AppState>, body: String) -> ServerResult<String> {
    let url = body.trim();
    if url.is_empty() {
        return Err(ServerError::BadRequest("empty repository URL".into()));
    }

    let (slot, dir) = state.store.allocate_git_slot().await?;
    let commits = match state.git.index(url, &dir).await {
        Ok(commits) => commits,
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(slot, error = %cleanup, "failed to remove abandoned git slot");
            }
            return Err(e);
        }
    };
    let added = state.store.register_git(url, &commits).await?;
    info!(url, slot, commits = commits.len(), added, "git repository indexed");
    Ok(slot.to_string())
}

/// `GET /git`: the literal path is shadowed by the registration route, so
/// answer as the object route would for a hash that does not parse.
pub async fn git_not_found() -> ServerError {
    ServerError::NotFound("git".to_string())
}
