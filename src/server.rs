//! HTTP front end: a hand-rolled accept loop (so a raw socket is available per connection
//! for [`ConnectionAbort`]), the response cache read/write around the dispatcher, and the
//! translation from [`DispatchOutcome`] into a real `axum::response::Response`.
//!
//! `axum::serve` never exposes the accepted socket to a handler, which is what the
//! checksum-failure abort needs; this instead follows axum's own documented low-level
//! recipe (`hyper_util::server::conn::auto` driving a `tower::Service` by hand).

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tower::Service;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::cache::{self, CachedResponse, ResponseCache};
use crate::config::Settings;
use crate::conn::ConnectionAbort;
use crate::dispatcher::{self, DispatchContext};
use crate::models::Domain;
use crate::outcome::{BodyPolicy, DispatchOutcome};
use crate::resolver;

struct AppState {
    ctx: DispatchContext,
    cache: Option<ResponseCache>,
    settings: Arc<Settings>,
}

/// Splits an incoming request path into `(domain_name, relative_path)`, stripping the
/// configured content prefix and, if `domain_enabled`, the leading domain segment.
fn split_request_path<'a>(settings: &Settings, raw_path: &'a str) -> Option<(String, &'a str)> {
    let prefix = settings.content_path_prefix.trim_end_matches('/');
    let rest = raw_path.strip_prefix(prefix)?.trim_start_matches('/');
    if settings.domain_enabled {
        let (domain, rel) = rest.split_once('/').unwrap_or((rest, ""));
        if domain.is_empty() {
            return None;
        }
        Some((domain.to_string(), rel))
    } else {
        Some(("default".to_string(), rest))
    }
}

pub async fn serve(ctx: DispatchContext, cache: Option<ResponseCache>, settings: Arc<Settings>) -> anyhow::Result<()> {
    let bind_addr = settings.bind_addr.clone();
    let state = Arc::new(AppState { ctx, cache, settings });

    let app = Router::new()
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("content gateway listening on {bind_addr}");

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown signal received");
                break;
            }
        };

        let abort = match duplicate_for_abort(&stream) {
            Ok(abort) => Some(abort),
            Err(err) => {
                log::warn!("could not duplicate socket for {peer_addr} ({err}); checksum-failure abort disabled for this connection");
                None
            }
        };

        let app = app.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(abort.clone());
                let mut app = app.clone();
                async move {
                    let (parts, body) = req.into_parts();
                    let req = Request::from_parts(parts, Body::new(body));
                    let response: Result<Response, Infallible> = app.call(req).await;
                    response
                }
            });

            if let Err(err) = ConnBuilder::new(TokioExecutor::new()).serve_connection(io, service).await {
                log::debug!("connection from {peer_addr} ended: {err}");
            }
        });
    }

    Ok(())
}

fn duplicate_for_abort(stream: &tokio::net::TcpStream) -> std::io::Result<ConnectionAbort> {
    let dup = socket2::SockRef::from(stream).try_clone()?;
    Ok(ConnectionAbort::new(dup.into()))
}

async fn handle(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Extension(abort): Extension<Option<ConnectionAbort>>,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some((domain_name, rel_path)) = split_request_path(&state.settings, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let query = uri.query().unwrap_or("");

    let domain = match state.ctx.store.get_domain(&domain_name).await {
        Ok(Some(domain)) => domain,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            log::error!("domain lookup for {domain_name} failed: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let range_header = headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok()).map(str::to_string);

    if let Some(cache) = &state.ctx_cache() {
        if let Some(response) = try_cache(cache, &state, &domain, rel_path, method.as_str(), query).await {
            return response;
        }
    }

    let outcome = dispatcher::dispatch(&state.ctx, &domain, rel_path, method.clone(), &headers, range_header.as_deref(), query, abort).await;

    let response = match outcome {
        Ok(outcome) => outcome_to_response(outcome).await,
        Err(err) => err.into_response(),
    };

    if let Some(cache) = &state.ctx_cache() {
        return cache_if_eligible(cache, &state, &domain, rel_path, method.as_str(), query, response).await;
    }

    response
}

impl AppState {
    fn ctx_cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }
}

/// Checks the Response Cache: base-path discovery via one `MGET`, then an auth
/// gate (never replay a cached body for a guarded base path; the guard must run every
/// time since the cached bytes carry no record of who was allowed to see them).
async fn try_cache(cache: &ResponseCache, state: &Arc<AppState>, domain: &Domain, path: &str, method: &str, query: &str) -> Option<Response> {
    let candidates = resolver::candidate_base_paths(path);
    let base_path = cache.discover_base_path(&candidates).await.ok().flatten()?;
    let guard_present = cache.guard_present_hint(&base_path).await.ok().flatten().unwrap_or(true);
    if guard_present {
        return None;
    }
    let cache_path = cache::cache_scope(&state.settings, domain, path);
    let cached = cache.get_response(&base_path, &cache_path, method, query).await.ok().flatten()?;
    Some(replay(cached))
}

async fn cache_if_eligible(
    cache: &ResponseCache,
    state: &Arc<AppState>,
    domain: &Domain,
    path: &str,
    method: &str,
    query: &str,
    response: Response,
) -> Response {
    let Some((base_path, has_guard)) = resolve_cache_metadata(&state.ctx, domain.id, path).await else {
        return response;
    };
    if let Err(err) = cache.register_base_path(&base_path).await {
        log::warn!("failed to register cache base path {base_path}: {err}");
    }
    if let Err(err) = cache.set_guard_present_hint(&base_path, has_guard).await {
        log::warn!("failed to set guard hint for {base_path}: {err}");
    }
    if has_guard || !is_cacheable(&response) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("failed to buffer response for caching: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cached = CachedResponse {
        status: parts.status.as_u16(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect(),
        body: bytes.to_vec(),
    };

    let cache_path = cache::cache_scope(&state.settings, domain, path);
    if let Err(err) = cache.put_response(&base_path, &cache_path, method, query, &cached).await {
        log::warn!("failed to populate cache for {cache_path}: {err}");
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// A second, cheap resolve purely to learn the matched distribution's base path and
/// guard presence for cache bookkeeping; the dispatcher already did the same lookup to
/// actually serve the request. Duplicated rather than threaded through the dispatcher's
/// return value, to keep cache bookkeeping out of the dispatch return type.
async fn resolve_cache_metadata(ctx: &DispatchContext, domain_id: uuid::Uuid, path: &str) -> Option<(String, bool)> {
    match resolver::resolve(&ctx.store, domain_id, path).await.ok()? {
        resolver::ResolveOutcome::Resolved { distribution, .. } => {
            Some((distribution.base_path, distribution.content_guard_id.is_some()))
        }
        _ => None,
    }
}

/// Only whole, already-materialized bodies are worth caching: rendered listings and
/// redirects. Streamed on-demand fetches and local file bodies are served fresh every
/// time, since buffering a large artifact into the cache would cost more than it saves.
fn is_cacheable(response: &Response) -> bool {
    matches!(response.status(), StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
        || (response.status() == StatusCode::OK
            && response.headers().get(axum::http::header::CONTENT_TYPE).is_some_and(|v| v.as_bytes().starts_with(b"text/html")))
}

fn replay(cached: CachedResponse) -> Response {
    let mut builder = Response::builder().status(StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK));
    for (name, value) in &cached.headers {
        if let Ok(value) = HeaderValue::from_str(value) {
            builder = builder.header(name, value);
        }
    }
    builder.body(Body::from(cached.body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn outcome_to_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Html { body, body_policy } => {
            let body = if body_policy == BodyPolicy::HeadersOnly { Bytes::new() } else { Bytes::from(body.into_bytes()) };
            Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        DispatchOutcome::Redirect { location, status, extra_headers } => {
            let mut builder = Response::builder().status(status);
            if let Some(headers) = builder.headers_mut() {
                for (name, value) in extra_headers {
                    headers.insert(name, value);
                }
            }
            builder
                .header(axum::http::header::LOCATION, location)
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        DispatchOutcome::Streamed(response) => response,
        DispatchOutcome::File { absolute_path, filename, content_type, total_size, range, body_policy, extra_headers } => {
            serve_file(absolute_path, filename, content_type, total_size, range, body_policy, extra_headers).await
        }
    }
}

async fn serve_file(
    path: String,
    filename: String,
    content_type: Option<String>,
    total_size: u64,
    range: Option<(u64, u64)>,
    body_policy: BodyPolicy,
    extra_headers: Vec<(axum::http::HeaderName, HeaderValue)>,
) -> Response {
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            log::error!("failed to open artifact {path}: {err}");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let (status, content_length, content_range) = match range {
        Some((start, stop)) => {
            if let Err(err) = file.seek(std::io::SeekFrom::Start(start)).await {
                log::error!("failed to seek artifact {path} to {start}: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            (StatusCode::PARTIAL_CONTENT, stop - start, Some(format!("bytes {start}-{}/{total_size}", stop - 1)))
        }
        None => (StatusCode::OK, total_size, None),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(axum::http::header::ACCEPT_RANGES, "bytes")
        .header(axum::http::header::CONTENT_LENGTH, content_length)
        .header(axum::http::header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""))
        .header(axum::http::HeaderName::from_static("x-pulp-artifact-size"), total_size);
    if let Some(content_type) = &content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, content_type.as_str());
    }
    if let Some(content_range) = content_range {
        builder = builder.header(axum::http::header::CONTENT_RANGE, content_range);
    }
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in extra_headers {
            headers.insert(name, value);
        }
    }

    if body_policy == BodyPolicy::HeadersOnly {
        return builder.body(Body::empty()).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let limited = file.take(content_length);
    let stream = tokio_util::io::ReaderStream::new(limited);
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[test]
fn test_split_request_path_without_domain() {
    let settings: Settings = toml::from_str(
        r#"
        bind_addr = "127.0.0.1:8080"
        db_pgconn = "postgres://localhost/pulp"
        redis_url = "redis://localhost"
        content_path_prefix = "/pulp/content"
        "#,
    )
    .unwrap();
    let (domain, rel) = split_request_path(&settings, "/pulp/content/repo/pool/a.deb").unwrap();
    assert_eq!(domain, "default");
    assert_eq!(rel, "repo/pool/a.deb");
}

#[test]
fn test_split_request_path_with_domain() {
    let settings: Settings = toml::from_str(
        r#"
        bind_addr = "127.0.0.1:8080"
        db_pgconn = "postgres://localhost/pulp"
        redis_url = "redis://localhost"
        content_path_prefix = "/pulp/content"
        domain_enabled = true
        "#,
    )
    .unwrap();
    let (domain, rel) = split_request_path(&settings, "/pulp/content/mydomain/repo/pool/a.deb").unwrap();
    assert_eq!(domain, "mydomain");
    assert_eq!(rel, "repo/pool/a.deb");
}
