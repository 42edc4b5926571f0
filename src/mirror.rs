//! Mirror Fallback: tries each candidate mirror in priority order, falling through
//! to the next one on a pre-stream-safe failure, stopping immediately on anything else.

use std::sync::Arc;

use axum::http::Method;
use uuid::Uuid;

use crate::conn::ConnectionAbort;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::mime;
use crate::models::{Remote, RemoteArtifact};
use crate::outcome::DispatchOutcome;
use crate::persister::PersistTarget;
use crate::store::Store;
use crate::streamer::{self, AttemptOutcome, CacheRebuild, StreamRequest};

/// One URL worth trying. `remote_artifact` is `None` only for the very first pull-through
/// fetch of a path that has no `RemoteArtifact` row yet; there
/// is nothing to mark as failed or cool down in that case, just a single shot at the remote.
pub struct MirrorCandidate {
    pub remote: Remote,
    pub remote_artifact: Option<RemoteArtifact>,
    pub url: String,
}

#[allow(clippy::too_many_arguments)]
pub async fn fetch(
    store: Arc<dyn Store>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
    abort: Option<ConnectionAbort>,
    candidates: Vec<MirrorCandidate>,
    persist_target: PersistTarget,
    domain_id: Uuid,
    relative_path: &str,
    range_header: Option<&str>,
    method: Method,
    artifact_storage_root: &str,
    cache_rebuild: Option<CacheRebuild>,
) -> Result<DispatchOutcome, GatewayError> {
    for candidate in candidates {
        // A brand-new pull-through path has no `ContentArtifact` row yet, so its mirror
        // policy can't have been set with this fetch in mind; only persist it if the path
        // maps to a recognized content type, the same gate the repository sync side uses.
        let save = match &persist_target {
            PersistTarget::Existing { .. } => candidate.remote.policy != crate::models::RemotePolicy::Streamed,
            PersistTarget::New { .. } => mime::get_type(relative_path).is_some(),
        };
        let req = StreamRequest {
            domain_id,
            remote: candidate.remote.clone(),
            remote_artifact: candidate.remote_artifact.clone(),
            url: candidate.url.clone(),
            relative_path: relative_path.to_string(),
            range_header: range_header.map(str::to_string),
            method: method.clone(),
            persist_target: persist_target.clone(),
            save,
            artifact_storage_root: artifact_storage_root.to_string(),
            cache_rebuild: cache_rebuild.clone(),
        };

        match streamer::attempt(store.clone(), client.clone(), metrics.clone(), abort.clone(), req).await {
            AttemptOutcome::Started(outcome) => return Ok(outcome),
            AttemptOutcome::RangeNotSatisfiable(err) => return Err(err),
            AttemptOutcome::Fatal(err) => return Err(err),
            AttemptOutcome::PreStreamFailed(reason) => {
                // Pre-stream failures are skip-and-continue only; `failed_at` is reserved
                // for the mid-stream digest-mismatch case handled in `streamer::run_download`.
                log::debug!(
                    "mirror {} failed for {relative_path}: {reason}",
                    candidate.remote.name
                );
            }
        }
    }

    Err(GatewayError::NotFound)
}

#[test]
fn test_mirror_candidate_is_constructible() {
    let remote = Remote {
        id: Uuid::new_v4(),
        name: "upstream".to_string(),
        base_url: "https://example.test/repo/".to_string(),
        policy: crate::models::RemotePolicy::OnDemand,
        content_type: None,
    };
    let candidate = MirrorCandidate { remote, remote_artifact: None, url: "https://example.test/repo/a.deb".to_string() };
    assert_eq!(candidate.url, "https://example.test/repo/a.deb");
}
