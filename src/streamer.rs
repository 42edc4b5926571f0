//! On-demand streamer.
//!
//! Fetches one `RemoteArtifact` from upstream, forwarding bytes to the client as they
//! arrive while copying the same bytes to a local staging file, then hands the finished
//! download to the artifact persister. The persistence phase runs to completion in a
//! detached task even if the client disconnects mid-stream; only the part before headers
//! are sent back can still be cut short by the caller.

use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::blob::{ArtifactLocation, BlobStore};
use crate::cache::{CachedResponse, ResponseCache};
use crate::conn::ConnectionAbort;
use crate::downloader::{DownloadError, Downloader, UpstreamHeaders};
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::mime;
use crate::models::{ContentArtifact, Domain, Remote, RemoteArtifact};
use crate::outcome::DispatchOutcome;
use crate::persister::{self, DownloadedFile, PersistTarget};
use crate::range;
use crate::store::Store;

/// Upstream headers are forwarded verbatim except these; `content-length`
/// and `content-encoding` are excluded because the streamer recomputes them itself
/// (ranged slicing changes the length, and an encoded body defeats byte-accounting).
const EXCLUDED_HEADERS: &[&str] = &[
    "connection",
    "content-encoding",
    "content-length",
    "keep-alive",
    "public",
    "proxy-authenticate",
    "transfer-encoding",
    "upgrade",
];

pub struct StreamRequest {
    pub domain_id: Uuid,
    pub remote: Remote,
    pub remote_artifact: Option<RemoteArtifact>,
    pub url: String,
    pub relative_path: String,
    pub range_header: Option<String>,
    pub method: Method,
    pub persist_target: PersistTarget,
    pub save: bool,
    pub artifact_storage_root: String,
    pub cache_rebuild: Option<CacheRebuild>,
}

/// Everything needed to rebuild a cacheable response for the request that triggered an
/// on-demand fetch, once that fetch has persisted an artifact locally. Carried alongside
/// the `StreamRequest` rather than looked up again, since the request's distribution and
/// path are already resolved by the time the mirror ladder runs.
#[derive(Clone)]
pub struct CacheRebuild {
    pub cache: ResponseCache,
    pub domain: Domain,
    pub blob: Arc<BlobStore>,
    pub base_path: String,
    pub full_path: String,
    pub method: String,
    pub query: String,
}

/// What one attempt against a single mirror settled as. Mirrors [`DownloadError`]'s own
/// pre-stream-safe split: only `PreStreamFailed` lets the mirror fallback ladder
/// move on to the next `RemoteArtifact`.
pub enum AttemptOutcome {
    Started(DispatchOutcome),
    RangeNotSatisfiable(GatewayError),
    PreStreamFailed(String),
    Fatal(GatewayError),
}

enum StartError {
    PreStream(String),
    RangeNotSatisfiable(GatewayError),
    Fatal(GatewayError),
}

struct HeaderOutcome {
    status: StatusCode,
    headers: HeaderMap,
}

struct DownloadState {
    /// Absolute `[start, stop)` bounds to forward to the client; `None` means "all of it".
    resolved_range: Option<(u64, u64)>,
    seen: u64,
    header_tx: Option<oneshot::Sender<Result<HeaderOutcome, StartError>>>,
    body_tx: mpsc::UnboundedSender<Result<Bytes, std::io::Error>>,
    staging_file: Option<std::fs::File>,
}

pub async fn attempt(
    store: Arc<dyn Store>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
    abort: Option<ConnectionAbort>,
    req: StreamRequest,
) -> AttemptOutcome {
    let (header_tx, header_rx) = oneshot::channel();
    // Unbounded: `on_data` is a synchronous callback (reqwest drives it from inside an
    // async loop it owns), so it cannot await a bounded channel's backpressure without
    // either dropping bytes or blocking the reactor. A slow client can grow this queue;
    // acceptable for the artifact sizes this gateway expects.
    let (body_tx, body_rx) = mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();

    tokio::spawn(run_download(store, client, metrics, abort, req, header_tx, body_tx));

    match header_rx.await {
        Ok(Ok(outcome)) => AttemptOutcome::Started(build_response(outcome, body_rx)),
        Ok(Err(StartError::PreStream(reason))) => AttemptOutcome::PreStreamFailed(reason),
        Ok(Err(StartError::RangeNotSatisfiable(err))) => AttemptOutcome::RangeNotSatisfiable(err),
        Ok(Err(StartError::Fatal(err))) => AttemptOutcome::Fatal(err),
        // The task ended (panicked, or dropped the sender) without ever resolving headers.
        Err(_) => AttemptOutcome::PreStreamFailed("download task ended before headers arrived".to_string()),
    }
}

fn build_response(
    outcome: HeaderOutcome,
    body_rx: mpsc::UnboundedReceiver<Result<Bytes, std::io::Error>>,
) -> DispatchOutcome {
    let body = Body::from_stream(futures::stream::unfold(body_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));
    let mut response = Response::builder().status(outcome.status);
    *response.headers_mut().unwrap() = outcome.headers;
    DispatchOutcome::Streamed(response.body(body).expect("header map built from valid HeaderValue instances"))
}

async fn run_download(
    store: Arc<dyn Store>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
    abort: Option<ConnectionAbort>,
    req: StreamRequest,
    header_tx: oneshot::Sender<Result<HeaderOutcome, StartError>>,
    body_tx: mpsc::UnboundedSender<Result<Bytes, std::io::Error>>,
) {
    let staging_file = if req.save {
        let root = req.artifact_storage_root.clone();
        match tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(&root)).await {
            Ok(Ok(file)) => Some(file),
            Ok(Err(err)) => {
                let _ = header_tx.send(Err(StartError::Fatal(GatewayError::Internal(err.into()))));
                return;
            }
            Err(err) => {
                let _ = header_tx.send(Err(StartError::Fatal(GatewayError::Internal(err.into()))));
                return;
            }
        }
    } else {
        None
    };

    let known_size = req.remote_artifact.as_ref().and_then(|ra| ra.size).map(|s| s as u64);
    let client_requested_range = req.range_header.clone();

    // A range that's already invalid against a size we know ahead of time never needs to
    // touch upstream at all.
    if let (Some(raw), Some(size)) = (client_requested_range.as_deref().and_then(range::parse_raw), known_size) {
        if range::resolve(raw, size).is_err() {
            let _ = header_tx.send(Err(StartError::RangeNotSatisfiable(GatewayError::range_not_satisfiable(
                req.remote_artifact.as_ref().and_then(|ra| ra.size),
            ))));
            return;
        }
    }

    let state = Arc::new(Mutex::new(DownloadState {
        resolved_range: None,
        seen: 0,
        header_tx: Some(header_tx),
        body_tx,
        staging_file: staging_file.as_ref().map(|f| f.as_file().try_clone().expect("dup staging fd")),
    }));

    let forward_body = req.method != Method::HEAD;
    let expected_sha256 = req.remote_artifact.as_ref().and_then(|ra| ra.expected_sha256.clone());
    let metrics_for_headers = metrics.clone();

    let on_headers = {
        let state = state.clone();
        let client_requested_range = client_requested_range.clone();
        let known_size = known_size;
        move |upstream: UpstreamHeaders| -> Result<(), GatewayError> {
            let upstream_content_length = upstream
                .headers
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let is_encoded = upstream.headers.get(reqwest::header::CONTENT_ENCODING).is_some();
            let total = known_size.or(upstream_content_length);

            let resolved_range = match client_requested_range.as_deref() {
                Some(value) => {
                    let total = total.ok_or_else(|| GatewayError::range_not_satisfiable(None))?;
                    let raw = range::parse_raw(value).ok_or_else(|| GatewayError::range_not_satisfiable(Some(total as i64)))?;
                    let resolved = range::resolve(raw, total).map_err(|_| GatewayError::range_not_satisfiable(Some(total as i64)))?;
                    Some((resolved.start, resolved.stop, total))
                }
                None => None,
            };

            let mut headers = HeaderMap::new();
            for (name, value) in upstream.headers.iter() {
                if EXCLUDED_HEADERS.contains(&name.as_str()) {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }

            let status = match resolved_range {
                Some((start, stop, total)) => {
                    headers.insert(
                        axum::http::header::CONTENT_LENGTH,
                        HeaderValue::from_str(&(stop - start).to_string()).expect("digit string is a valid header value"),
                    );
                    headers.insert(
                        axum::http::header::CONTENT_RANGE,
                        HeaderValue::from_str(&format!("bytes {}-{}/{}", start, stop - 1, total))
                            .expect("formatted range is a valid header value"),
                    );
                    StatusCode::PARTIAL_CONTENT
                }
                None => {
                    if let Some(len) = upstream_content_length {
                        headers.insert(
                            axum::http::header::CONTENT_LENGTH,
                            HeaderValue::from_str(&len.to_string()).expect("digit string is a valid header value"),
                        );
                    }
                    upstream.status
                }
            };

            if !is_encoded {
                if let Some(len) = upstream_content_length {
                    headers.insert(
                        HeaderName::from_static("x-pulp-artifact-size"),
                        HeaderValue::from_str(&len.to_string()).expect("digit string is a valid header value"),
                    );
                    metrics_for_headers.add_artifact_bytes(len);
                }
            }

            let mut guard = state.lock().expect("stream state mutex poisoned");
            guard.resolved_range = resolved_range.map(|(start, stop, _)| (start, stop));
            if let Some(tx) = guard.header_tx.take() {
                let _ = tx.send(Ok(HeaderOutcome { status, headers }));
            }
            Ok(())
        }
    };

    let on_data = {
        let state = state.clone();
        move |chunk: &[u8]| -> Result<(), GatewayError> {
            let mut guard = state.lock().expect("stream state mutex poisoned");
            let chunk_start = guard.seen;
            let chunk_end = chunk_start + chunk.len() as u64;
            guard.seen = chunk_end;

            if let Some(file) = guard.staging_file.as_mut() {
                use std::io::Write;
                file.write_all(chunk).map_err(|err| GatewayError::Internal(err.into()))?;
            }

            if forward_body {
                let slice = match guard.resolved_range {
                    Some((start, stop)) => {
                        let lo = start.saturating_sub(chunk_start).min(chunk.len() as u64) as usize;
                        let hi = stop.saturating_sub(chunk_start).min(chunk.len() as u64) as usize;
                        if lo < hi { &chunk[lo..hi] } else { &[] }
                    }
                    None => chunk,
                };
                if !slice.is_empty() {
                    let _ = guard.body_tx.send(Ok(Bytes::copy_from_slice(slice)));
                }
            }
            Ok(())
        }
    };

    let on_finalize = {
        let state = state.clone();
        move || -> Result<(), GatewayError> {
            let mut guard = state.lock().expect("stream state mutex poisoned");
            if let Some(file) = guard.staging_file.as_mut() {
                use std::io::Write;
                file.flush().map_err(|err| GatewayError::Internal(err.into()))?;
            }
            Ok(())
        }
    };

    let downloader = Downloader::new(client);
    let result = downloader
        .run(&req.url, expected_sha256.as_deref(), on_headers, on_data, on_finalize)
        .await;

    match result {
        Ok(download_result) => {
            if let Some(temp_file) = staging_file {
                match finalize_persistence(
                    &store,
                    &req,
                    temp_file,
                    download_result.bytes_transferred,
                    download_result.sha256,
                )
                .await
                {
                    Ok(content_artifact) => {
                        if let Some(rebuild) = &req.cache_rebuild {
                            if let Err(err) = attach_to_cache(rebuild, &content_artifact).await {
                                log::warn!("failed to rebuild cache entry for {}: {err:#}", req.relative_path);
                            }
                        }
                    }
                    Err(err) => {
                        log::error!("failed to persist on-demand fetch of {}: {err:#}", req.relative_path);
                    }
                }
            }
        }
        Err(DownloadError::Connection(reason)) => fail_pre_stream(&state, reason),
        Err(DownloadError::Upstream { status }) => fail_pre_stream(&state, format!("upstream returned {status}")),
        Err(DownloadError::Callback(gateway_err)) => fail_callback(&state, gateway_err),
        Err(DownloadError::Digest { expected, actual }) => {
            log::warn!("digest mismatch fetching {}: expected {expected}, got {actual}", req.url);
            if let Some(remote_artifact) = &req.remote_artifact {
                let _ = store.mark_remote_artifact_failed(remote_artifact.id, persister::now()).await;
            }
            if let Some(abort) = &abort {
                abort.abort();
            }
        }
    }
}

fn fail_pre_stream(state: &Arc<Mutex<DownloadState>>, reason: String) {
    let mut guard = state.lock().expect("stream state mutex poisoned");
    if let Some(tx) = guard.header_tx.take() {
        let _ = tx.send(Err(StartError::PreStream(reason)));
    }
}

fn fail_callback(state: &Arc<Mutex<DownloadState>>, err: GatewayError) {
    let mut guard = state.lock().expect("stream state mutex poisoned");
    if let Some(tx) = guard.header_tx.take() {
        let start_err = match err {
            GatewayError::RangeNotSatisfiable { size_header } => {
                StartError::RangeNotSatisfiable(GatewayError::RangeNotSatisfiable { size_header })
            }
            other => StartError::Fatal(other),
        };
        let _ = tx.send(Err(start_err));
    } else {
        log::error!("stream callback failed after headers were already sent: {err:#}");
    }
}

async fn finalize_persistence(
    store: &Arc<dyn Store>,
    req: &StreamRequest,
    temp_file: tempfile::NamedTempFile,
    size: u64,
    sha256: String,
) -> anyhow::Result<ContentArtifact> {
    let storage_path = format!("{}/{}/{}", &sha256[0..2], &sha256[2..4], sha256);
    let final_path = format!("{}/{}", req.artifact_storage_root.trim_end_matches('/'), storage_path);
    let final_path_for_blocking = final_path.clone();
    if let Some(parent) = std::path::Path::new(&final_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::task::spawn_blocking(move || temp_file.persist(final_path_for_blocking)).await??;

    let download = DownloadedFile { storage_path, size: size as i64, sha256 };
    let content_artifact = persister::persist(store, req.domain_id, req.persist_target.clone(), download, &req.remote, &req.url).await?;
    Ok(content_artifact)
}

/// Post-run persistence, step 2: rebuild the 4.F response shape for the artifact just
/// saved and hand it to the response cache, so the next identical request hits cache
/// instead of re-fetching. Only `Redirect` locations are cached, matching the policy
/// in `server::is_cacheable` that never buffers a streamed or local-file body into Redis.
async fn attach_to_cache(rebuild: &CacheRebuild, content_artifact: &ContentArtifact) -> anyhow::Result<()> {
    let artifact = match &content_artifact.artifact {
        Some(artifact) => artifact,
        None => return Ok(()),
    };
    let filename = content_artifact
        .relative_path
        .rsplit('/')
        .next()
        .unwrap_or(&content_artifact.relative_path);
    let content_type = mime::get_type(&content_artifact.relative_path);

    let location = rebuild.blob.locate(&rebuild.domain, &artifact.storage_path, filename, content_type).await?;
    if let ArtifactLocation::Redirect { url } = location {
        let cached = CachedResponse { status: 302, headers: vec![("location".to_string(), url)], body: Vec::new() };
        rebuild
            .cache
            .put_response(&rebuild.base_path, &rebuild.full_path, &rebuild.method, &rebuild.query, &cached)
            .await?;
    }
    Ok(())
}

#[test]
fn test_excluded_headers_cover_content_length_and_encoding() {
    assert!(EXCLUDED_HEADERS.contains(&"content-length"));
    assert!(EXCLUDED_HEADERS.contains(&"content-encoding"));
    assert!(EXCLUDED_HEADERS.contains(&"connection"));
}
