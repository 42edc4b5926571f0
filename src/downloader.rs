//! The downloader contract.
//!
//! Rather than a shared object with `handle_data`/`finalize` methods overridden per
//! caller, the three callbacks are plain closures passed into [`Downloader::run`],
//! which owns the actual `reqwest` fetch and digest computation.

use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

/// Headers as they arrived from upstream, handed to the caller's `on_headers`
/// closure before any byte is forwarded downstream.
pub struct UpstreamHeaders {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

pub struct DownloadResult {
    pub bytes_transferred: u64,
    pub sha256: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Upstream connection could not be established, or it returned the wrong shape.
    /// Safe to retry against a different mirror as long as no byte has been forwarded yet.
    #[error("upstream connection failed: {0}")]
    Connection(String),

    #[error("upstream returned {status}")]
    Upstream { status: StatusCode },

    /// The body checksummed differently than `expected_sha256` promised. By the time this
    /// is raised, bytes have already been forwarded to the client; the caller must not retry
    /// this mirror and must tear down the client connection.
    #[error("digest validation failed: expected {expected}, got {actual}")]
    Digest { expected: String, actual: String },

    /// The caller's callback rejected the response (maps back to whatever `GatewayError`
    /// it produced, e.g. 416 computed against a freshly-learned `Content-Length`).
    #[error(transparent)]
    Callback(#[from] GatewayError),
}

impl DownloadError {
    /// Pre-stream-safe errors: nothing has reached the client yet, so the mirror
    /// fallback ladder may move on to the next `RemoteArtifact`.
    pub fn is_pre_stream_safe(&self) -> bool {
        matches!(self, DownloadError::Connection(_) | DownloadError::Upstream { .. })
    }
}

/// A thin wrapper over a shared `reqwest::Client`. One instance is handed out per
/// remote artifact fetch (`remote.get_downloader(remote_artifact, headers_cb)` in the
/// original); here it is just a cheap value since the client itself is the shared part.
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Runs a single fetch of `url`, calling `on_headers` once the response headers
    /// arrive, `on_data` for each body chunk (already slightly reordered/buffered by
    /// `reqwest`, never split mid-byte), and `on_finalize` once the body is exhausted.
    ///
    /// This method never retries internally; the caller decides whether to retry a
    /// *different* mirror, and a digest failure always short-circuits that decision.
    ///
    /// Always fetches the whole body, never a `Range`-restricted one: the digest must be
    /// computed over the complete object, and byte-range slicing for the client happens
    /// downstream in the streamer's `on_data` callback instead.
    pub async fn run<H, D, F>(
        &self,
        url: &str,
        expected_sha256: Option<&str>,
        mut on_headers: H,
        mut on_data: D,
        on_finalize: F,
    ) -> Result<DownloadResult, DownloadError>
    where
        H: FnMut(UpstreamHeaders) -> Result<(), GatewayError>,
        D: FnMut(&[u8]) -> Result<(), GatewayError>,
        F: FnOnce() -> Result<(), GatewayError>,
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| DownloadError::Connection(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Upstream {
                status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            });
        }

        on_headers(UpstreamHeaders {
            status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK),
            headers: response.headers().clone(),
        })?;

        let mut hasher = Sha256::new();
        let mut bytes_transferred = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(|err| DownloadError::Connection(err.to_string()))?;
            hasher.update(&chunk);
            bytes_transferred += chunk.len() as u64;
            on_data(&chunk)?;
        }
        on_finalize()?;

        let sha256 = hex::encode(hasher.finalize());
        if let Some(expected) = expected_sha256 {
            if !expected.eq_ignore_ascii_case(&sha256) {
                return Err(DownloadError::Digest {
                    expected: expected.to_string(),
                    actual: sha256,
                });
            }
        }

        Ok(DownloadResult { bytes_transferred, sha256 })
    }
}

#[test]
fn test_pre_stream_safe_classification() {
    assert!(DownloadError::Connection("refused".into()).is_pre_stream_safe());
    assert!(DownloadError::Upstream { status: StatusCode::BAD_GATEWAY }.is_pre_stream_safe());
    assert!(!DownloadError::Digest { expected: "a".into(), actual: "b".into() }.is_pre_stream_safe());
}
