//! Artifact Responder: serves a `ContentArtifact` whose `Artifact` is already
//! local, picking the response shape the storage backend demands.

use anyhow::Result;
use axum::http::{HeaderName, HeaderValue};

use crate::blob::{ArtifactLocation, BlobStore};
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::mime;
use crate::models::{Artifact, Domain};
use crate::outcome::{BodyPolicy, DispatchOutcome};
use crate::range;

fn basename(relative_path: &str) -> &str {
    relative_path.rsplit('/').next().unwrap_or(relative_path)
}

static X_PULP_ARTIFACT_SIZE: HeaderName = HeaderName::from_static("x-pulp-artifact-size");

/// Serves `artifact` at `relative_path`, honoring `range_header`.
pub async fn respond(
    domain: &Domain,
    blob: &BlobStore,
    metrics: &Metrics,
    artifact: &Artifact,
    relative_path: &str,
    range_header: Option<&str>,
    body_policy: BodyPolicy,
) -> Result<DispatchOutcome, GatewayError> {
    let filename = basename(relative_path);
    let content_type = mime::get_type(relative_path).map(str::to_string);
    let size = artifact.size as u64;

    let resolved_range = match range_header {
        Some(value) => {
            let raw = range::parse_raw(value).ok_or_else(|| GatewayError::range_not_satisfiable(Some(artifact.size)))?;
            let resolved = range::resolve(raw, size).map_err(|_| GatewayError::range_not_satisfiable(Some(artifact.size)))?;
            Some((resolved.start, resolved.stop))
        }
        None => None,
    };

    let location = blob
        .locate(domain, &artifact.storage_path, filename, content_type.as_deref())
        .await
        .map_err(GatewayError::Internal)?;

    let effective_len = resolved_range.map(|(start, stop)| stop - start).unwrap_or(size);
    metrics.add_artifact_bytes(effective_len);

    match location {
        ArtifactLocation::LocalFile { path } => Ok(DispatchOutcome::File {
            absolute_path: path,
            filename: filename.to_string(),
            content_type,
            total_size: size,
            range: resolved_range,
            body_policy,
            extra_headers: Vec::new(),
        }),
        ArtifactLocation::Redirect { url } => {
            let mut extra_headers = Vec::new();
            if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
                extra_headers.push((X_PULP_ARTIFACT_SIZE.clone(), value));
            }
            Ok(DispatchOutcome::Redirect { location: url, status: axum::http::StatusCode::FOUND, extra_headers })
        }
        ArtifactLocation::Proxied { response } => {
            let response = if body_policy == BodyPolicy::HeadersOnly {
                let (parts, _) = response.into_parts();
                axum::response::Response::from_parts(parts, axum::body::Body::empty())
            } else {
                response
            };
            Ok(DispatchOutcome::Streamed(response))
        }
    }
}

#[test]
fn test_basename() {
    assert_eq!(basename("pool/main/a/a.deb"), "a.deb");
    assert_eq!(basename("a.deb"), "a.deb");
}
