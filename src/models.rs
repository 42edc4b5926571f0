//! Data model shared by the store, dispatcher, and HTTP layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Policy controlling whether content fetched from a [`Remote`] is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePolicy {
    /// Always download and save content ahead of time (not exercised by the content app itself).
    Immediate,
    /// Fetch on first request and persist the result.
    OnDemand,
    /// Fetch on every request; never persisted.
    Streamed,
}

/// Which blob backend a domain's artifacts are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    S3,
    Azure,
    Gcs,
}

/// The kind of capability a [`Distribution`] exposes, standing in for the
/// original's subclass dispatch (`Distribution.cast()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    /// A plain distribution: publication, repository (version), and/or remote as configured.
    Standard,
    /// The internal synthetic distribution that serves single artifacts directly by digest.
    /// Always excluded from directory listings.
    Artifact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentGuardKind {
    BearerToken,
}

#[derive(Debug, Clone)]
pub struct ContentGuard {
    pub id: Uuid,
    pub name: String,
    pub kind: ContentGuardKind,
    /// Opaque, kind-specific configuration (e.g. the expected bearer token).
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub id: Uuid,
    pub name: String,
    pub storage_kind: StorageKind,
    pub redirect_to_object_storage: bool,
    pub storage_settings: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: Uuid,
    pub name: String,
    pub pull_through_supported: bool,
}

#[derive(Debug, Clone)]
pub struct RepositoryVersion {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub number: i64,
}

#[derive(Debug, Clone)]
pub struct Publication {
    pub id: Uuid,
    pub repository_version_id: Uuid,
    pub pass_through: bool,
    pub checkpoint: bool,
    pub complete: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Distribution {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub base_path: String,
    pub kind: DistributionKind,
    pub hidden: bool,
    pub checkpoint: bool,
    pub serve_from_publication: bool,
    pub content_guard_id: Option<Uuid>,
    pub publication_id: Option<Uuid>,
    pub repository_id: Option<Uuid>,
    pub repository_version_id: Option<Uuid>,
    pub remote_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: Uuid,
    pub domain_id: Uuid,
    /// Relative path of the file inside the domain's storage backend.
    pub storage_path: String,
    pub size: i64,
    pub sha256: String,
}

impl Artifact {
    /// The content-address lookup used to converge concurrent saves on one row.
    pub fn content_address(&self) -> (&Uuid, &str) {
        (&self.domain_id, &self.sha256)
    }
}

#[derive(Debug, Clone)]
pub struct ContentArtifact {
    pub id: Uuid,
    pub content_id: Uuid,
    pub relative_path: String,
    pub artifact_id: Option<Uuid>,
    pub artifact: Option<Artifact>,
}

impl ContentArtifact {
    pub fn is_local(&self) -> bool {
        self.artifact.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RemoteArtifact {
    pub id: Uuid,
    pub remote_id: Uuid,
    pub content_artifact_id: Uuid,
    pub url: String,
    pub size: Option<i64>,
    pub failed_at: Option<OffsetDateTime>,
    /// Lower sorts first; mirrors the alternate-content-source priority ordering.
    pub acs_priority: i32,
    /// Digest the upstream repository metadata promised for this path, if known.
    /// A mismatch between this and the downloaded bytes is a `DigestValidationError`.
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Remote {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub policy: RemotePolicy,
    /// Content-type to assume for newly pulled-through content, if this remote serves a single
    /// well-known type; `None` disables pull-through saving for unmapped paths.
    pub content_type: Option<String>,
}
