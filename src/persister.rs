//! Artifact Persister: turns a completed download into a durable `Artifact`
//! plus the `ContentArtifact`/`Content` rows that reference it.

use std::sync::Arc;

use anyhow::Result;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{Artifact, ContentArtifact, Remote, RepositoryVersion};
use crate::store::Store;

/// What the On-Demand Streamer handed off after a successful fetch.
pub struct DownloadedFile {
    pub storage_path: String,
    pub size: i64,
    pub sha256: String,
}

/// The two ways persistence can be entered: an existing
/// `ContentArtifact` row missing its `Artifact` (normal on-demand), or no
/// `ContentArtifact` at all yet (first pull-through fetch of a new path).
#[derive(Clone)]
pub enum PersistTarget {
    Existing { content_artifact: ContentArtifact },
    New { domain_id: Uuid, repository_version: Option<RepositoryVersion>, relative_path: String },
}

/// Saves `download`, returning the `ContentArtifact` now pointing at a
/// local `Artifact`.
pub async fn persist(
    store: &Arc<dyn Store>,
    domain_id: Uuid,
    target: PersistTarget,
    download: DownloadedFile,
    remote: &Remote,
    url: &str,
) -> Result<ContentArtifact> {
    // Step 1: converge concurrent saves of identical content on one Artifact row;
    // `save_artifact`'s ON CONFLICT DO UPDATE makes this idempotent without a
    // separate unlink-the-loser step (sqlx runs it as one upsert statement).
    let artifact = store
        .save_artifact(domain_id, &download.storage_path, download.size, &download.sha256)
        .await?;
    if artifact.storage_path != download.storage_path {
        // Someone else's save won the race; our freshly-written file is a duplicate.
        let _ = tokio::fs::remove_file(&download.storage_path).await;
    }

    let content_artifact = match target {
        PersistTarget::Existing { content_artifact } => {
            attach(store, &content_artifact, &artifact).await?
        }
        PersistTarget::New { domain_id, repository_version, relative_path } => {
            create_new(store, domain_id, repository_version, &relative_path, &artifact).await?
        }
    };

    // Step 3: record the mirror coordinates for future fallback ladders, ignoring
    // the unique-violation race the store already folds into an upsert.
    store
        .save_remote_artifact(remote.id, content_artifact.id, url, Some(download.size as i64))
        .await?;

    Ok(content_artifact)
}

async fn attach(store: &Arc<dyn Store>, content_artifact: &ContentArtifact, artifact: &Artifact) -> Result<ContentArtifact> {
    store
        .attach_artifact_to_content_artifact(content_artifact.id, artifact.id)
        .await?;
    Ok(ContentArtifact {
        artifact: Some(artifact.clone()),
        artifact_id: Some(artifact.id),
        ..content_artifact.clone()
    })
}

async fn create_new(
    store: &Arc<dyn Store>,
    domain_id: Uuid,
    repository_version: Option<RepositoryVersion>,
    relative_path: &str,
    artifact: &Artifact,
) -> Result<ContentArtifact> {
    // Unique-violation race: a concurrent first pull-through of the same path may have
    // already created the ContentArtifact; if so, attach our (possibly redundant) artifact
    // to it instead of creating a duplicate.
    if let Some(rv) = &repository_version {
        if let Some(existing) = store.find_content_artifact_by_path(rv.id, relative_path).await? {
            if existing.artifact.is_none() {
                return attach(store, &existing, artifact).await;
            }
            return Ok(existing);
        }
    }

    let content_artifact = store.create_content_artifact(domain_id, relative_path, artifact.id).await?;
    if let Some(rv) = &repository_version {
        store.add_content_to_repository_version(rv.id, content_artifact.content_id).await?;
    }
    Ok(ContentArtifact {
        artifact: Some(artifact.clone()),
        ..content_artifact
    })
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
