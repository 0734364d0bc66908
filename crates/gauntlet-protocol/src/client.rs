use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use gauntlet_types::{ContentHash, GitRedirect, ObjectKind};
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

use crate::endpoint::{endpoints, TYPE_HEADER};
use crate::error::{ProtocolError, ProtocolResult};
use crate::source::{Fetched, ObjectSource};

/// HTTP client for a Gauntlet object store.
///
/// Redirects are never followed automatically: a `301` carrying
/// `X-Gauntlet-Type: git` is a result, not a detour.
#[derive(Clone, Debug)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: Url,
}

impl StoreClient {
    pub fn new(base_url: &str) -> ProtocolResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ProtocolError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> ProtocolResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProtocolError::InvalidUrl(format!("{path}: {e}")))
    }

    fn object_url(&self, hash: &ContentHash) -> ProtocolResult<Url> {
        self.url(&hash.to_hex())
    }
}

/// Interpret a `3xx` marked as a git redirect.
fn git_redirect(hash: &ContentHash, response: &Response) -> ProtocolResult<Option<GitRedirect>> {
    if !response.status().is_redirection() {
        return Ok(None);
    }
    let kind = response
        .headers()
        .get(TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(ObjectKind::parse);
    if kind != Some(ObjectKind::Git) {
        return Ok(None);
    }
    let url = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ProtocolError::UnexpectedResponse(format!("git redirect for {hash} has no Location"))
        })?;
    Ok(Some(GitRedirect {
        hash: *hash,
        url: url.to_string(),
    }))
}

/// Turn a non-success response into an error carrying its status and body.
async fn check(hash: Option<&ContentHash>, response: Response) -> ProtocolResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(hash)) = (status, hash) {
        return Err(ProtocolError::NotFound(*hash));
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProtocolError::Remote {
        status: status.as_u16(),
        body,
    })
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn parse_hash(response: Response) -> ProtocolResult<ContentHash> {
    let text = response.text().await?;
    Ok(ContentHash::from_hex(text.trim())?)
}

#[async_trait]
impl ObjectSource for StoreClient {
    async fn fetch(&self, hash: &ContentHash) -> ProtocolResult<Fetched> {
        let response = self.http.get(self.object_url(hash)?).send().await?;
        if let Some(redirect) = git_redirect(hash, &response)? {
            debug!(%hash, url = %redirect.url, "git redirect");
            return Ok(Fetched::Redirect(redirect));
        }
        let response = check(Some(hash), response).await?;
        let size = content_length(&response);
        debug!(%hash, ?size, "fetching object");
        let body = response.bytes_stream().map_err(ProtocolError::from).boxed();
        Ok(Fetched::Object { size, body })
    }

    async fn fetch_size(&self, hash: &ContentHash) -> ProtocolResult<u64> {
        let response = self.http.head(self.object_url(hash)?).send().await?;
        if let Some(redirect) = git_redirect(hash, &response)? {
            return Err(ProtocolError::Redirected(redirect));
        }
        let response = check(Some(hash), response).await?;
        content_length(&response).ok_or_else(|| {
            ProtocolError::UnexpectedResponse(format!("no Content-Length for {hash}"))
        })
    }

    async fn publish_bytes(&self, data: Bytes) -> ProtocolResult<ContentHash> {
        let size = data.len();
        let response = self
            .http
            .post(self.url(endpoints::PUBLISH)?)
            .body(data)
            .send()
            .await?;
        let hash = parse_hash(check(None, response).await?).await?;
        debug!(%hash, size, "published object");
        Ok(hash)
    }

    async fn publish_file(&self, path: &Path) -> ProtocolResult<ContentHash> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let response = self
            .http
            .post(self.url(endpoints::PUBLISH)?)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        let hash = parse_hash(check(None, response).await?).await?;
        debug!(%hash, size, path = %path.display(), "published file");
        Ok(hash)
    }

    async fn register_git(&self, url: &str) -> ProtocolResult<u64> {
        let response = self
            .http
            .post(self.url(endpoints::GIT)?)
            .body(url.to_string())
            .send()
            .await?;
        let text = check(None, response).await?.text().await?;
        let slot = text
            .trim()
            .parse()
            .map_err(|_| ProtocolError::UnexpectedResponse(format!("bad slot id: {text:?}")))?;
        debug!(url, slot, "registered git repository");
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client = StoreClient::new("http://127.0.0.1:8000/store").unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:8000/store/");
    }

    #[test]
    fn object_urls_are_relative_to_base() {
        let client = StoreClient::new("http://127.0.0.1:8000/store/").unwrap();
        let hash = ContentHash::from_digest([0x11; 20]);
        assert_eq!(
            client.object_url(&hash).unwrap().as_str(),
            format!("http://127.0.0.1:8000/store/{}", "11".repeat(20))
        );
        assert_eq!(
            client.url(endpoints::GIT).unwrap().as_str(),
            "http://127.0.0.1:8000/store/git"
        );
    }

    #[test]
    fn invalid_base_url() {
        let err = StoreClient::new("not a url").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUrl(_)));
    }
}
